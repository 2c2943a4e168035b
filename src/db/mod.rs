mod repository;
mod schema;

pub use repository::{
    FeedBatch, FeedUpdate, PersistStats, PlaylistBatch, PlaylistUpdate, Repository, Table,
};
