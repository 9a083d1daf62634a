//! visreg: visual regression comparison for browser-rendered pages
//!
//! Captures a page or element, stores the capture next to a committed
//! baseline, diffs the two rasters pixel by pixel and applies a tolerance
//! policy. Artifacts go to disk and to an optional test report.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Capturer  │──►│ Baseline  │──►│ Image    │──►│ Verdict  │──►│ Report   │
//! │ (page)    │   │ Store     │   │ Differ   │   │ Engine   │   │ Attacher │
//! └───────────┘   └───────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use visreg::{MockPage, SnapshotOptions, VisualComparator, VisualConfig};
//! # async fn run() -> visreg::VisregResult<()> {
//! let page = MockPage::new(image::RgbaImage::new(400, 300));
//! let comparator = VisualComparator::new(VisualConfig::load(None)?);
//! let result = comparator
//!     .expect_page_to_match_snapshot(&page, "home", "landing", &SnapshotOptions::new())
//!     .await?;
//! result.assert_passed()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

pub mod baseline;
pub mod browser;
pub mod capture;
pub mod comparator;
pub mod config;
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub mod differ;
pub mod geometry;
pub mod logging;
pub mod options;
pub mod report;
mod result;
pub mod snapshot;
pub mod verdict;

pub use baseline::{sanitize_segment, BaselineEntry, BaselineStore, SeedOutcome, SnapshotKey};
#[cfg(feature = "browser")]
pub use browser::{Browser, CdpPage};
pub use browser::{BrowserConfig, MockPage};
pub use capture::{CapturePage, CaptureRequest, CaptureTarget, Capturer, ScreenshotParams, StyleId};
pub use comparator::{evaluate, BaselineStatus, ComparisonResult, Evaluation, VisualComparator};
pub use config::{ReportingFailurePolicy, UpdateMode, VisualConfig};
pub use differ::{
    compared_pixel_count, DiffMask, DiffOutput, DiffRenderOptions, DiffSummary, ImageDiffer,
};
pub use geometry::{BoundingBox, MaskTarget, Region, Viewport};
pub use logging::{init_tracing, LogFormat};
pub use options::{
    Animations, CaptureSettings, Caret, ResolvedOptions, ScaleMode, SnapshotOptions,
};
pub use report::{attach_comparison, Attachment, DirectoryReport, MemoryReport, ReportSink};
pub use result::{ReportingError, VisregError, VisregResult};
pub use snapshot::Snapshot;
pub use verdict::{PolicyComposition, Verdict, VerdictPolicy, VerdictReason};
