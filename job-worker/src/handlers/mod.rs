pub mod cleanup;
pub mod email;
pub mod pdf;
pub mod rollup;

pub use cleanup::GuestSessionCleanupHandler;
pub use email::{OrderConfirmationEmailHandler, ShippingNotificationHandler};
pub use pdf::PdfGenerationHandler;
pub use rollup::AnalyticsRollupHandler;
