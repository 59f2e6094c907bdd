mod article;
mod enrichment;

pub use article::{
    Article, ArticleChanges, ArticleStatus, ArticleUpdate, NewArticle, NewArticleRequest,
};
pub use enrichment::{
    EnrichmentKind, EnrichmentTask, FailureKind, GenerationResult, TaskReport, TaskState,
};
