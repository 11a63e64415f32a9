use std::io::{self, Read, Write};
use std::mem::size_of;

/// Reserved pid sentinel meaning "the manager" in SOCKET `CLOSED` payloads.
pub const PID_SERVER: i32 = 0;
/// Reserved pid sentinel meaning "a peer compute client" in SOCKET `CLOSED` payloads.
pub const PID_CLIENT: i32 = 1;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Null = 0,
    Done = 1,
    Closed = 2,
    Kill = 3,
    Range = 4,
    PerfNum = 5,
    Notify = 6,
    Accept = 7,
    Refuse = 8,
}

impl Tag {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Tag::Null,
            1 => Tag::Done,
            2 => Tag::Closed,
            3 => Tag::Kill,
            4 => Tag::Range,
            5 => Tag::PerfNum,
            6 => Tag::Notify,
            7 => Tag::Accept,
            8 => Tag::Refuse,
            _ => return None,
        })
    }
}

/// On-wire layout: a tag plus the widest payload any variant needs (a
/// `RANGE` carries two `i64`s). `#[repr(C)]` with no padding ambiguity —
/// every record is exactly `size_of::<WireRecord>()` bytes, regardless
/// of tag, so a reader never needs to know the tag before it knows how
/// many bytes to read.
#[repr(C)]
#[derive(Clone, Copy)]
struct WireRecord {
    tag: u32,
    _pad: u32,
    a: i64,
    b: i64,
}

const WIRE_SIZE: usize = size_of::<WireRecord>();

/// A single record of the tagged union shared by the pipe and socket transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Null,
    /// W→M: request more work, or end-of-range.
    Done { pid: i32 },
    /// W→M, M→R: premature termination.
    Closed { pid: i32 },
    /// R→M: shutdown request.
    Kill,
    /// M→W: range assignment, inclusive on both ends.
    Range { start: i64, end: i64 },
    /// W→M, W→R: a discovered perfect number.
    PerfNum { n: i64 },
    /// R→M: subscribe to the live result stream.
    Notify,
    /// M→R: subscription granted.
    Accept,
    /// M→R: subscription denied, or no more work.
    Refuse,
}

impl Record {
    fn to_wire(self) -> WireRecord {
        match self {
            Record::Null => WireRecord { tag: Tag::Null as u32, _pad: 0, a: 0, b: 0 },
            Record::Done { pid } => {
                WireRecord { tag: Tag::Done as u32, _pad: 0, a: pid as i64, b: 0 }
            }
            Record::Closed { pid } => {
                WireRecord { tag: Tag::Closed as u32, _pad: 0, a: pid as i64, b: 0 }
            }
            Record::Kill => WireRecord { tag: Tag::Kill as u32, _pad: 0, a: 0, b: 0 },
            Record::Range { start, end } => {
                WireRecord { tag: Tag::Range as u32, _pad: 0, a: start, b: end }
            }
            Record::PerfNum { n } => WireRecord { tag: Tag::PerfNum as u32, _pad: 0, a: n, b: 0 },
            Record::Notify => WireRecord { tag: Tag::Notify as u32, _pad: 0, a: 0, b: 0 },
            Record::Accept => WireRecord { tag: Tag::Accept as u32, _pad: 0, a: 0, b: 0 },
            Record::Refuse => WireRecord { tag: Tag::Refuse as u32, _pad: 0, a: 0, b: 0 },
        }
    }

    fn from_wire(wire: WireRecord) -> Option<Self> {
        Some(match Tag::from_u32(wire.tag)? {
            Tag::Null => Record::Null,
            Tag::Done => Record::Done { pid: wire.a as i32 },
            Tag::Closed => Record::Closed { pid: wire.a as i32 },
            Tag::Kill => Record::Kill,
            Tag::Range => Record::Range { start: wire.a, end: wire.b },
            Tag::PerfNum => Record::PerfNum { n: wire.a },
            Tag::Notify => Record::Notify,
            Tag::Accept => Record::Accept,
            Tag::Refuse => Record::Refuse,
        })
    }
}

/// Outcome of a single `recv` call: a full record, an orderly peer close
/// (0 bytes), or (for non-blocking descriptors) "nothing ready yet".
#[derive(Debug)]
pub enum RecvOutcome {
    Record(Record),
    Closed,
    WouldBlock,
}

/// Write exactly `size_of::<WireRecord>()` bytes for `record`.
pub fn send<W: Write>(w: &mut W, record: Record) -> io::Result<()> {
    let wire = record.to_wire();
    // SAFETY: WireRecord is a `#[repr(C)]` plain-old-data struct with no
    // padding that is ever read; viewing it as bytes is safe for this
    // in-host, non-portable wire format.
    let bytes = unsafe {
        std::slice::from_raw_parts(&wire as *const WireRecord as *const u8, WIRE_SIZE)
    };
    w.write_all(bytes)
}

/// Zero-fills a record-sized buffer, then reads until it is full, retrying
/// short reads and `EINTR`. Returns `Closed` on an orderly peer close
/// (0 bytes read before anything else arrived), `WouldBlock` if the first
/// read on a non-blocking descriptor has nothing ready, and otherwise the
/// decoded record. Any tag outside the enumeration is rejected.
pub fn recv<R: Read>(r: &mut R) -> io::Result<RecvOutcome> {
    let mut buf = [0u8; WIRE_SIZE];
    let mut filled = 0usize;

    while filled < WIRE_SIZE {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(RecvOutcome::Closed);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-record",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if filled == 0 {
                    return Ok(RecvOutcome::WouldBlock);
                }
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    // SAFETY: `buf` is exactly `size_of::<WireRecord>()` initialized bytes;
    // WireRecord has no invalid bit patterns for its integer fields.
    let wire: WireRecord = unsafe { std::ptr::read(buf.as_ptr() as *const WireRecord) };
    match Record::from_wire(wire) {
        Some(record) => Ok(RecvOutcome::Record(record)),
        None => Err(io::Error::new(io::ErrorKind::InvalidData, "unrecognised record tag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(record: Record) -> Record {
        let mut buf = Vec::new();
        send(&mut buf, record).unwrap();
        assert_eq!(buf.len(), WIRE_SIZE);
        let mut cursor = Cursor::new(buf);
        match recv(&mut cursor).unwrap() {
            RecvOutcome::Record(r) => r,
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn every_variant_round_trips() {
        assert_eq!(roundtrip(Record::Null), Record::Null);
        assert_eq!(roundtrip(Record::Done { pid: 4242 }), Record::Done { pid: 4242 });
        assert_eq!(roundtrip(Record::Closed { pid: PID_SERVER }), Record::Closed { pid: PID_SERVER });
        assert_eq!(roundtrip(Record::Kill), Record::Kill);
        assert_eq!(
            roundtrip(Record::Range { start: 1, end: 1000 }),
            Record::Range { start: 1, end: 1000 }
        );
        assert_eq!(roundtrip(Record::PerfNum { n: 8128 }), Record::PerfNum { n: 8128 });
        assert_eq!(roundtrip(Record::Notify), Record::Notify);
        assert_eq!(roundtrip(Record::Accept), Record::Accept);
        assert_eq!(roundtrip(Record::Refuse), Record::Refuse);
    }

    #[test]
    fn orderly_close_on_empty_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        match recv(&mut cursor).unwrap() {
            RecvOutcome::Closed => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn short_record_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8; WIRE_SIZE - 1]);
        assert!(recv(&mut cursor).is_err());
    }

    #[test]
    fn unrecognised_tag_is_rejected() {
        let mut buf = vec![0u8; WIRE_SIZE];
        buf[0] = 0xFF; // tag = 255, not in the enumeration
        let mut cursor = Cursor::new(buf);
        assert!(recv(&mut cursor).is_err());
    }

    #[test]
    fn records_are_fixed_and_equal_width() {
        let mut a = Vec::new();
        send(&mut a, Record::Kill).unwrap();
        let mut b = Vec::new();
        send(&mut b, Record::Range { start: 1, end: 1_000_000 }).unwrap();
        assert_eq!(a.len(), b.len());
    }
}
