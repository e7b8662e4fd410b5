pub mod cluster;
pub mod export;
pub mod flatten;
pub mod table;

pub mod errors {
    use std::io;
    use std::path::PathBuf;

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum FlattenError {
        #[error("{dxf_type} entity {handle:?} produced a non-finite coordinate")]
        NonFiniteCoordinate { dxf_type: String, handle: String },
    }

    #[derive(Debug, Error)]
    pub enum ExportError {
        #[error("failed to write {path}: {source}")]
        Write {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
        #[error("output stream error: {0}")]
        Stream(#[source] io::Error),
        #[error("failed to encode JSON: {0}")]
        Json(#[from] serde_json::Error),
    }
}

pub use cluster::{IsolatedTable, TableRegion, detect_tables, extract_inner_table, extract_tables};
pub use errors::{ExportError, FlattenError};
pub use export::{TableFormat, save_flat_csv, save_table, table_file_name};
pub use flatten::{FLAT_COLUMNS, FlatRow, FlattenOptions, FlattenReport, Flattened, flatten, flatten_with};
pub use table::{Grid, TableMatrix, TableOptions, reconstruct, reconstruct_layout};
