pub mod config;
pub mod indicators;
pub mod json_files;
pub mod ports;
pub mod series;
pub mod store;
pub mod stream;

pub use config::StoreConfig;
pub use indicators::Indicators;
pub use json_files::JsonFiles;
pub use ports::{Downloader, Persistence};
pub use series::BarSeries;
pub use store::Store;
pub use stream::BarStream;
