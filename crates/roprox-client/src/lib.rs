pub mod checker;
pub mod loader;
pub mod sources;

#[cfg(feature = "browser")]
pub mod browser;

pub use checker::{CheckerConfig, HttpLivenessChecker};
pub use loader::{LoaderConfig, ReqwestLoader};
pub use sources::{GeoNode, GouBanJia, SocksProxy, SpysOne, default_sources};

#[cfg(feature = "browser")]
pub use browser::ChromiumBrowser;
