pub mod app_config;
pub mod availability;
pub mod outbound;
pub mod proxy_config;
pub mod settings;
pub mod submission;
pub mod vote;

pub use app_config::AppConfig;
pub use availability::{AvailabilityResult, ProbeStatus};
pub use outbound::{Keyboard, KeyboardButton, OutboundMessage};
pub use proxy_config::{Endpoint, ProxyConfig, Scheme};
pub use settings::BotSettings;
pub use submission::{Submission, SubmissionStatus};
pub use vote::{VoteKind, VoteRecord};
