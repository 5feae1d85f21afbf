pub mod browser;
pub mod cache;
mod defense;
pub mod extract;
pub mod fetcher;
pub mod identity;

pub use browser::BrowserFetcher;
pub use cache::CachedFetcher;
pub use extract::SelectorExtractor;
pub use fetcher::HttpFetcher;
pub use identity::IdentityPool;
