mod content;
mod email;
mod fingerprint;
mod summary;

pub use content::{ContentItem, ContentKind, Disposition, NewContentItem};
pub use email::{CrawledArticle, IncomingEmail};
pub use fingerprint::{ContentFingerprint, FingerprintKind, NewFingerprint};
pub use summary::{NewSummary, Summary, SummaryStatus};
