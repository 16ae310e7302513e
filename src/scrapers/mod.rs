pub mod alchemy; // REST client for the upstream NFT metadata provider
pub mod collection; // Pagination and batch fallback on top of the client

pub use alchemy::{AlchemyClient, MetadataProvider};
pub use collection::{CollectionFetcher, Partial, SoftError, SoftErrorKind};
