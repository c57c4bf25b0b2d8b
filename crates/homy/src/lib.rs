pub mod api;
pub mod config;
pub mod discovery;
pub mod onboarding;
pub mod store;

pub use config::Config;
pub use config::LogLevel;
pub use discovery::DiscoveryMachine;
pub use discovery::DiscoveryState;
pub use discovery::DiscoveryTarget;
pub use onboarding::Onboarding;
pub use onboarding::Step;
pub use store::Device;
pub use store::Entity;
pub use store::Store;
