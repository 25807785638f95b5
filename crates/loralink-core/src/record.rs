//! Line records — the on-wire format shared with the modem firmware.
//!
//! Every record is one comma-separated text line:
//!
//! ```text
//! MSG,<origin>,<sequence>,<signal_quality>,<distance>,<text>
//! FRAG,<origin>,<sequence>,<index>,<total>,<signal_quality>,<distance>,<chunk>
//! ```
//!
//! The trailing field takes the remainder of the line, so a `MSG` text may
//! contain commas. The field count is fixed per kind. Anything that does not
//! parse is dropped at this boundary: the radio truncates and corrupts lines
//! often enough that a bad line is routine, not an error.

use std::fmt;

pub const MSG_TAG: &str = "MSG";
pub const FRAG_TAG: &str = "FRAG";

/// Radio measurements the receiving modem attaches to each record.
///
/// Either value may be unknown; a garbled metric never invalidates a line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkMetrics {
    pub signal_quality: Option<f64>,
    pub distance: Option<f64>,
}

impl LinkMetrics {
    /// What a transmitting host writes; the modem fills in real values.
    pub const OUTGOING: Self = Self {
        signal_quality: Some(0.0),
        distance: Some(0.0),
    };

    fn parse(signal_quality: &str, distance: &str) -> Self {
        Self {
            signal_quality: parse_metric(signal_quality),
            distance: parse_metric(distance),
        }
    }
}

fn parse_metric(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

struct Metric(Option<f64>);

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v}"),
            None => Ok(()),
        }
    }
}

/// A complete small text payload carried in a single line.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub origin: String,
    pub sequence: u32,
    pub metrics: LinkMetrics,
    pub text: String,
}

/// One slice of a multi-part payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRecord {
    pub origin: String,
    pub sequence: u32,
    /// Position in `[0, total)`.
    pub index: u32,
    pub total: u32,
    pub metrics: LinkMetrics,
    /// Base64 text of one slice of the encoded payload.
    pub chunk: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Message(MessageRecord),
    Fragment(FragmentRecord),
}

impl Record {
    /// Parse one line. Returns `None` for anything malformed: unknown tag,
    /// missing fields, non-numeric `sequence`/`index`/`total`, `total == 0`,
    /// or `index >= total`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (tag, rest) = line.split_once(',')?;
        match tag {
            MSG_TAG => {
                let mut fields = rest.splitn(5, ',');
                let origin = fields.next()?;
                let sequence = fields.next()?.trim().parse().ok()?;
                let signal_quality = fields.next()?;
                let distance = fields.next()?;
                let text = fields.next()?;
                Some(Self::Message(MessageRecord {
                    origin: origin.to_owned(),
                    sequence,
                    metrics: LinkMetrics::parse(signal_quality, distance),
                    text: text.to_owned(),
                }))
            }
            FRAG_TAG => {
                let mut fields = rest.splitn(7, ',');
                let origin = fields.next()?;
                let sequence = fields.next()?.trim().parse().ok()?;
                let index: u32 = fields.next()?.trim().parse().ok()?;
                let total: u32 = fields.next()?.trim().parse().ok()?;
                let signal_quality = fields.next()?;
                let distance = fields.next()?;
                let chunk = fields.next()?;
                if total == 0 || index >= total {
                    return None;
                }
                Some(Self::Fragment(FragmentRecord {
                    origin: origin.to_owned(),
                    sequence,
                    index,
                    total,
                    metrics: LinkMetrics::parse(signal_quality, distance),
                    chunk: chunk.to_owned(),
                }))
            }
            _ => None,
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Self::Message(m) => &m.origin,
            Self::Fragment(f) => &f.origin,
        }
    }

    pub fn sequence(&self) -> u32 {
        match self {
            Self::Message(m) => m.sequence,
            Self::Fragment(f) => f.sequence,
        }
    }
}

/// Formats the record as a line without its terminator.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => write!(
                f,
                "{MSG_TAG},{},{},{},{},{}",
                m.origin,
                m.sequence,
                Metric(m.metrics.signal_quality),
                Metric(m.metrics.distance),
                m.text
            ),
            Self::Fragment(r) => write!(
                f,
                "{FRAG_TAG},{},{},{},{},{},{},{}",
                r.origin,
                r.sequence,
                r.index,
                r.total,
                Metric(r.metrics.signal_quality),
                Metric(r.metrics.distance),
                r.chunk
            ),
        }
    }
}
