mod delivery;
mod normalizer;
mod spool;

pub use delivery::{Deliverer, OutboxDeliverer, WebhookDeliverer};
pub use normalizer::ContentNormalizer;
pub use spool::{MailSource, SpoolSource};
