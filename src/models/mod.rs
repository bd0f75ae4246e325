pub mod dedup;
pub mod invoice;
pub mod payment;
pub mod region;
pub mod result;
pub mod source;

pub use dedup::{
    DedupCandidate, DedupEntity, DedupStatus, DuplicateError, DuplicateKind, DuplicateReason,
    StoredInvoice, StoredPayment,
};
pub use invoice::{InvoiceExtracted, LineItem};
pub use payment::{PaymentExtracted, Platform};
pub use region::{OcrProfile, QrHeader, Region};
pub use result::{MatchScore, RankedCandidate};
pub use source::{FieldSource, SourceMap};
