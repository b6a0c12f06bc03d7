mod price_watch;
mod registry;
mod system_info;

pub use price_watch::PriceWatchTask;
pub use registry::TaskRegistry;
pub use system_info::SystemInfoTask;
