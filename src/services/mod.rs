pub mod captcha_solver;
pub mod direct_renewer;
pub mod login_service;
pub mod notifier;
pub mod relay_client;
pub mod relay_renewer;

pub use captcha_solver::CaptchaSolver;
pub use direct_renewer::DirectRenewer;
pub use login_service::FreeCloudClient;
pub use notifier::{Notifier, TelegramNotifier};
pub use relay_client::{HttpRelayTransport, RelayTransport};
pub use relay_renewer::{RelayRenewer, RetryPolicy, ThrottlePolicy};
