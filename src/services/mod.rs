pub mod chunker;
pub mod clustering;
pub mod embedding;
pub mod feeds;
pub mod html;
pub mod suggestions;
pub mod user_actions;

pub use chunker::RecursiveCharacterSplitter;
pub use embedding::{EmbeddingProvider, OllamaEmbedder};
pub use feeds::{FeedFetcher, HttpFeedFetcher};
pub use suggestions::SuggestionService;
pub use user_actions::UserActions;
