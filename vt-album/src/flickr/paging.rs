//! Page arithmetic for the photo search
//!
//! The search service never returns more than [`MAX_RESULTS`] results for a
//! query no matter how many pages it reports, so the usable page range is
//! clamped before a page is drawn. Everything here is pure.

use rand::Rng;
use std::fmt;
use vt_common::models::Coordinate;

/// Results requested per page
pub const PER_PAGE: u32 = 30;

/// Hard ceiling on results the service will return for one query
pub const MAX_RESULTS: u32 = 4000;

/// Half-width of the search box in degrees
pub const BOUNDING_BOX_HALF_WIDTH: f64 = 1.0;

/// Last page the service can actually serve: `ceil(MAX_RESULTS / PER_PAGE)`
pub const MAX_PAGES: u32 = (MAX_RESULTS + PER_PAGE - 1) / PER_PAGE;

/// Clamp a server-reported page count to the reachable range
///
/// Returns `None` when the server reported no pages.
pub fn clamp_page_count(reported: i64) -> Option<u32> {
    if reported <= 0 {
        return None;
    }
    Some(reported.min(MAX_PAGES as i64) as u32)
}

/// Draw a page uniformly from `[1, page_count]`
pub fn choose_page<R: Rng + ?Sized>(rng: &mut R, page_count: u32) -> u32 {
    if page_count <= 1 {
        return 1;
    }
    rng.gen_range(1..=page_count)
}

/// How many photos the chosen page should hold
///
/// `total` is the whole query's reported result count. It is trusted as-is
/// and never checked against the number of items actually returned.
pub fn expected_count_for_page(total: u64, page: u32, page_count: u32) -> usize {
    let per_page = PER_PAGE as u64;
    let effective = total.min(MAX_RESULTS as u64);

    let expected = if page == page_count {
        match effective % per_page {
            0 => effective.min(per_page),
            partial => partial,
        }
    } else {
        effective.min(per_page)
    };

    expected as usize
}

/// Search rectangle around a coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_longitude: f64,
    pub min_latitude: f64,
    pub max_longitude: f64,
    pub max_latitude: f64,
}

impl BoundingBox {
    /// Box of [`BOUNDING_BOX_HALF_WIDTH`] degrees around `center`, clamped to
    /// valid latitude and longitude
    pub fn around(center: Coordinate) -> Self {
        let d = BOUNDING_BOX_HALF_WIDTH;
        Self {
            min_longitude: (center.longitude - d).max(-180.0),
            min_latitude: (center.latitude - d).max(-90.0),
            max_longitude: (center.longitude + d).min(180.0),
            max_latitude: (center.latitude + d).min(90.0),
        }
    }
}

impl fmt::Display for BoundingBox {
    /// `minLon,minLat,maxLon,maxLat`, the form the `bbox` parameter expects
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_longitude, self.min_latitude, self.max_longitude, self.max_latitude
        )
    }
}
