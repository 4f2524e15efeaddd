pub mod db;
pub mod reasoning;
pub mod retrieval;

pub use db::DbAdapter;
pub use reasoning::OpenAiReasoningAdapter;
pub use retrieval::PgRetrievalAdapter;
