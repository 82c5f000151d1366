pub mod invoice_processor;

pub use invoice_processor::extract_and_validate_invoice;
