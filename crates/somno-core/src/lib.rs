//! Core pipeline for importing sleep-stage exports.
//!
//! Takes a device's flat JSON array of stage intervals and turns it into
//! validated, deduplicated session records in a Record Store:
//!
//! 1. parse and normalize (timestamps resolved against a reference zone,
//!    labels mapped to the stage vocabulary),
//! 2. segment into candidate sessions on over-threshold gaps,
//! 3. import each session with duplicate suppression and bounded retry.
//!
//! Every phase reports how many stage entries it skipped; the tallies
//! fold into the final [`ImportStats`].

pub mod import;
pub mod parse;
pub mod segment;
pub mod session;
pub mod stage;
pub mod store;

pub use import::{ImportStats, ImporterConfig, import_payload, run_import};
pub use parse::{
    MalformedEntry, ParsedEntries, PayloadError, RawStageEntry, parse_entries, parse_entry,
    parse_payload, zone_offset_seconds,
};
pub use segment::{SESSION_GAP, Segmentation, segment_intervals};
pub use session::SleepSession;
pub use stage::{StageInterval, StageKind, UnknownStageLabel};
pub use store::{ExistingSession, RecordStore, SessionRecord, StageRecord, StoreError};
