//! Replay mode for serving recorded HTTP traffic

mod replayer;

pub use replayer::HttpReplayer;
