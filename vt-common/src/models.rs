//! Entity model
//!
//! Pins and photos exist in two shapes:
//! - Records (`PinRecord`, `PhotoRecord`) are tier-agnostic rows. They are what
//!   the object graph, change sets and the database layer move around.
//! - Views (`Pin`, `Photo`) are what callers hold. Each view is tagged with the
//!   tier it was read from and must be resolved by identity before it can be
//!   used to build relationships in a different tier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parse from the hyphenated text form stored in the database
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// Stable identity of a pin, shared by every tier
    PinId
);

entity_id!(
    /// Stable identity of a photo, shared by every tier
    PhotoId
);

/// Latitude/longitude pair
///
/// Equality is exact `f64` equality on both components. Pins are only ever
/// compared against coordinates read back from a stored pin, never against
/// freshly sampled ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Stage of the commit pipeline an object view was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierKind {
    /// Private mutation tier; every write happens here
    Background,
    /// Reader tier; parent of Background
    Main,
    /// Owner of the database file; parent of Main
    Persisting,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TierKind::Background => "background",
            TierKind::Main => "main",
            TierKind::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

/// Pin row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinRecord {
    pub id: PinId,
    pub coordinate: Coordinate,
}

/// Photo row
///
/// `image` is `None` while the byte fetch is still in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: PhotoId,
    pub pin: PinId,
    pub title: String,
    pub image: Option<Vec<u8>>,
}

impl PhotoRecord {
    /// Whether the row may be written to disk
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Pin as seen from one tier
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    id: PinId,
    coordinate: Coordinate,
    photos: BTreeSet<PhotoId>,
    tier: TierKind,
}

impl Pin {
    pub fn from_record(record: &PinRecord, photos: BTreeSet<PhotoId>, tier: TierKind) -> Self {
        Self {
            id: record.id,
            coordinate: record.coordinate,
            photos,
            tier,
        }
    }

    pub fn id(&self) -> PinId {
        self.id
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn latitude(&self) -> f64 {
        self.coordinate.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.coordinate.longitude
    }

    /// Photos owned by this pin at the time the view was taken
    pub fn photos(&self) -> &BTreeSet<PhotoId> {
        &self.photos
    }

    pub fn tier(&self) -> TierKind {
        self.tier
    }

    pub fn is_at(&self, coordinate: Coordinate) -> bool {
        self.coordinate == coordinate
    }
}

/// Photo as seen from one tier
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    record: PhotoRecord,
    tier: TierKind,
}

impl Photo {
    pub fn from_record(record: PhotoRecord, tier: TierKind) -> Self {
        Self { record, tier }
    }

    pub fn id(&self) -> PhotoId {
        self.record.id
    }

    /// Owning pin
    pub fn pin(&self) -> PinId {
        self.record.pin
    }

    pub fn title(&self) -> &str {
        &self.record.title
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.record.image.as_deref()
    }

    pub fn has_image(&self) -> bool {
        self.record.has_image()
    }

    pub fn tier(&self) -> TierKind {
        self.tier
    }

    pub fn record(&self) -> &PhotoRecord {
        &self.record
    }
}
