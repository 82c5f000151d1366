use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One pharmaceutical line item as shown in the editable receipt table.
///
/// Wire names match the JSON the frontend and the stored history use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "nombreDelProductoFarmaceutico", default)]
    pub product_name: String,
    #[serde(rename = "nombreDelDispositivoMedico", default)]
    pub medical_device_name: String,
    #[serde(rename = "formaFarmaceutica", default)]
    pub pharmaceutical_form: String,
    #[serde(rename = "numeroDeLote", default)]
    pub lot_number: String,
    #[serde(rename = "concentracion", default)]
    pub concentration: String,
    #[serde(rename = "presentacion", default)]
    pub presentation: String,
    #[serde(rename = "fechaDeVencimiento", default)]
    pub expiration_date: String,
    #[serde(rename = "registroSanitario", default)]
    pub registration_number: String,
    #[serde(rename = "cantidadRecibida", default)]
    pub quantity_received: String,
    #[serde(rename = "envaseInmediato", default, deserialize_with = "lenient_bool")]
    pub immediate_packaging: bool,
    #[serde(rename = "envaseMediato", default, deserialize_with = "lenient_bool")]
    pub mediate_packaging: bool,
    #[serde(rename = "condicionesDeAlmacenamiento", default)]
    pub storage_conditions: String,
    #[serde(rename = "observaciones", default)]
    pub observations: String,
}

/// A merged invoice: header fields plus every product that shares its number.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvoiceData {
    #[serde(rename = "proveedor", default)]
    pub supplier: String,
    #[serde(rename = "numeroDeFactura", default)]
    pub invoice_number: String,
    #[serde(rename = "fechaDeEmision", default)]
    pub issue_date: String,
    #[serde(rename = "productos", default)]
    pub products: Vec<Product>,
}

/// Field-level complaint from the validation pass. `field` is a dotted path (`products.0.lotNumber`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedInvoice {
    pub data: InvoiceData,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
}

/// One uploaded file and every invoice found in it. `drive_file_id` marks a Drive-backed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceHistoryItem {
    pub id: String,
    pub file_name: String,
    pub processed_at: String,
    pub invoices: Vec<ProcessedInvoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_file_id: Option<String>,
}

impl InvoiceHistoryItem {
    /// New local item stamped with a fresh id and the current UTC time.
    pub fn new(file_name: impl Into<String>, invoices: Vec<ProcessedInvoice>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            processed_at: chrono::Utc::now().to_rfc3339(),
            invoices,
            drive_file_id: None,
        }
    }
}

/// Outcome of the extract-and-validate action, shaped for the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub processed_invoices: Option<Vec<ProcessedInvoice>>,
    pub error_message: Option<String>,
}

impl ActionResult {
    pub fn success(processed_invoices: Vec<ProcessedInvoice>) -> Self {
        Self {
            processed_invoices: Some(processed_invoices),
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            processed_invoices: None,
            error_message: Some(message.into()),
        }
    }
}

/// Packaging flag written as a bool, a 0/1 number, or a word such as "Conforme" or "sí".
/// Blank strings and nulls read as `None`.
pub(crate) fn lenient_opt_bool<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<bool>, D::Error> {
    let flag = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => Some(n.as_i64().unwrap_or(0) != 0),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "" => None,
            word => Some(matches!(
                word,
                "true" | "si" | "sí" | "yes" | "x" | "1" | "conforme" | "ok"
            )),
        },
        _ => None,
    };
    Ok(flag)
}

// Older history files store the packaging flags as free text.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(lenient_opt_bool(deserializer)?.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_uses_spanish_wire_names() {
        let product = Product {
            product_name: "AMOXICILINA".to_string(),
            quantity_received: "10".to_string(),
            immediate_packaging: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&product).unwrap();
        assert_eq!(json["nombreDelProductoFarmaceutico"], "AMOXICILINA");
        assert_eq!(json["cantidadRecibida"], "10");
        assert_eq!(json["envaseInmediato"], true);
        assert_eq!(json["observaciones"], "");
    }

    #[test]
    fn history_with_text_packaging_flags_still_loads() {
        let json = r#"{
            "id": "a1",
            "fileName": "factura.pdf",
            "processedAt": "2024-03-02T10:00:00.000Z",
            "invoices": [{
                "data": {
                    "proveedor": "Droguería Central",
                    "numeroDeFactura": "F-9",
                    "fechaDeEmision": "2024-03-01",
                    "productos": [
                        {"nombreDelProductoFarmaceutico": "IBUPROFENO", "envaseInmediato": "Conforme", "envaseMediato": ""},
                        {"nombreDelProductoFarmaceutico": "PARACETAMOL", "envaseInmediato": "No conforme", "envaseMediato": null},
                        {"nombreDelProductoFarmaceutico": "LORATADINA", "envaseInmediato": 1}
                    ]
                },
                "errors": []
            }]
        }"#;
        let item: InvoiceHistoryItem = serde_json::from_str(json).unwrap();
        let products = &item.invoices[0].data.products;
        assert!(products[0].immediate_packaging);
        assert!(!products[0].mediate_packaging);
        assert!(!products[1].immediate_packaging);
        assert!(!products[1].mediate_packaging);
        assert!(products[2].immediate_packaging);
        assert!(!products[2].mediate_packaging);

        // Saved again, the flags come out as plain booleans.
        let resaved = serde_json::to_value(&item).unwrap();
        assert_eq!(resaved["invoices"][0]["data"]["productos"][0]["envaseInmediato"], true);
        assert_eq!(resaved["invoices"][0]["data"]["productos"][0]["envaseMediato"], false);
        let reloaded: InvoiceHistoryItem = serde_json::from_value(resaved).unwrap();
        assert_eq!(reloaded, item);
    }

    #[test]
    fn history_item_omits_missing_drive_id() {
        let item = InvoiceHistoryItem::new("factura.pdf", vec![]);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["fileName"], "factura.pdf");
        assert!(json.get("driveFileId").is_none());
        assert!(uuid::Uuid::parse_str(&item.id).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&item.processed_at).is_ok());
    }

    #[test]
    fn action_result_serializes_nulls() {
        let json = serde_json::to_value(ActionResult::failure("sin datos")).unwrap();
        assert!(json["processedInvoices"].is_null());
        assert_eq!(json["errorMessage"], "sin datos");
    }
}
