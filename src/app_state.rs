use crate::cache::CacheManager;
use crate::cli::CommandLineArgs;
use crate::error::LoadError;
use crate::loader::{Schema, SourceLoader};
use crate::query::QueryFacade;
use crate::source::{JsonLinesReader, SourceReader};

use std::path::Path;
use std::sync::Arc;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Query entry point, owning the dataset cache.
    pub queries: QueryFacade,
}

impl AppState {
    /// Create and return an [AppState] reading cycle records from the configured directory.
    ///
    /// Fails only if a schema file is configured and cannot be read. The sources themselves are
    /// not read until the first request.
    pub fn new(args: &CommandLineArgs) -> Result<Self, LoadError> {
        let reader = JsonLinesReader::new(&args.data_path, &args.source_extension);
        Self::with_reader(args, Arc::new(reader))
    }

    /// Create and return an [AppState] reading cycle records from `reader`.
    pub fn with_reader(
        args: &CommandLineArgs,
        reader: Arc<dyn SourceReader>,
    ) -> Result<Self, LoadError> {
        let schema = match &args.schema_file {
            Some(path) => Schema::from_file(Path::new(path))?,
            None => Schema::cycle(),
        };
        let loader = SourceLoader::new(reader, schema).with_null_markers(args.null_markers.clone());
        let queries = QueryFacade::new(CacheManager::new(loader), args.use_rayon);

        Ok(Self { queries })
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
