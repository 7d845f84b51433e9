//! Shared test utilities.
//!
//! Provides a recording [`LoadSink`], a small resolver fixture, and
//! re-exports [`StaticLayout`] so module tests can build geometry without
//! reaching into `scenario`.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let mut sink = RecordingSink::default();
//! slot.compute(true, Some(Size::new(800.0, 450.0)), &mut sink);
//! assert_eq!(sink.requests(), vec!["public://a.jpg:landscape:800"]);
//! ```

pub use crate::scenario::StaticLayout;

use crate::resolver::{Axis, BucketTable, CropRect, Interpolation, RatioBucket, SizeResolver};
use crate::slot::{LoadRequest, LoadSink, RequestTicket, SlotId};

// =========================================================================
// Recording sink
// =========================================================================

/// One call a controller made on its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedLoad {
    Request { ticket: u64, url: String },
    Release { ticket: u64 },
}

/// A [`LoadSink`] that records calls instead of loading anything.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub loads: Vec<RecordedLoad>,
    pub requests_full: Vec<LoadRequest>,
}

impl RecordingSink {
    /// URLs of every request, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests_full.iter().map(|r| r.url.clone()).collect()
    }
}

impl LoadSink for RecordingSink {
    fn request(&mut self, request: LoadRequest) {
        self.loads.push(RecordedLoad::Request {
            ticket: request.ticket.0,
            url: request.url.clone(),
        });
        self.requests_full.push(request);
    }

    fn release(&mut self, _slot: SlotId, ticket: RequestTicket) {
        self.loads.push(RecordedLoad::Release { ticket: ticket.0 });
    }
}

// =========================================================================
// Resolver fixtures
// =========================================================================

/// A single 16:9 bucket named `landscape`, 200-2000px, step 50.
pub fn landscape_resolver() -> SizeResolver {
    let crop = Some(CropRect {
        width: 16,
        height: 9,
    });
    let table = BucketTable::new(vec![RatioBucket {
        id: "landscape".to_string(),
        crop,
        min: 200,
        max: 2000,
        interpolation: Interpolation::Linear,
        axis: Axis::for_crop(crop),
    }])
    .unwrap();
    SizeResolver::new(table, 50, true)
}
