//! Minimal TIFF IFD access for the three date tags.
//!
//! A TIFF file is itself a TIFF structure, and a PNG `eXIf` chunk carries the
//! same structure, so both are read and patched here. Offsets are relative to
//! the start of `data`.

use anyhow::{Context, Result, bail};

const TAG_DATE_TIME: u16 = 0x0132;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_DATE_TIME_DIGITIZED: u16 = 0x9004;

const TYPE_ASCII: u16 = 2;
const TYPE_LONG: u16 = 4;

const ENTRY_LEN: usize = 12;

/// Raw date strings found in a TIFF structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TiffDates {
    pub date_time: Option<String>,
    pub date_time_original: Option<String>,
    pub date_time_digitized: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn detect(data: &[u8]) -> Result<Self> {
        match data.get(..4) {
            Some(b"II*\0") => Ok(Self::Little),
            Some(b"MM\0*") => Ok(Self::Big),
            _ => bail!("Not TIFF data (bad header)"),
        }
    }

    fn u16_at(self, data: &[u8], offset: usize) -> Result<u16> {
        let b = data
            .get(offset..offset + 2)
            .context("TIFF data truncated")?;
        Ok(match self {
            Self::Little => u16::from_le_bytes([b[0], b[1]]),
            Self::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn u32_at(self, data: &[u8], offset: usize) -> Result<u32> {
        let b = data
            .get(offset..offset + 4)
            .context("TIFF data truncated")?;
        Ok(match self {
            Self::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            Self::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        })
    }

    fn u16_bytes(self, v: u16) -> [u8; 2] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    fn u32_bytes(self, v: u32) -> [u8; 4] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }
}

/// One 12-byte directory entry. `value` holds either the inline value or
/// the offset of the out-of-line data, exactly as stored.
#[derive(Debug, Clone)]
struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    value: [u8; 4],
}

struct Ifd {
    entries: Vec<Entry>,
    next: u32,
}

impl Ifd {
    fn find(&self, tag: u16) -> Option<&Entry> {
        self.entries.iter().find(|e| e.tag == tag)
    }
}

fn read_ifd(data: &[u8], order: ByteOrder, offset: usize) -> Result<Ifd> {
    let count = order.u16_at(data, offset)? as usize;
    let start = offset + 2;

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let raw = data
            .get(start + i * ENTRY_LEN..start + (i + 1) * ENTRY_LEN)
            .context("IFD entries extend beyond TIFF data")?;
        entries.push(Entry {
            tag: order.u16_at(raw, 0)?,
            kind: order.u16_at(raw, 2)?,
            count: order.u32_at(raw, 4)?,
            value: [raw[8], raw[9], raw[10], raw[11]],
        });
    }
    let next = order.u32_at(data, start + count * ENTRY_LEN)?;

    Ok(Ifd { entries, next })
}

/// IFD0 and, when IFD0 points to one, the Exif sub-IFD.
fn read_directories(data: &[u8], order: ByteOrder) -> Result<(Ifd, Option<Ifd>)> {
    let ifd0 = read_ifd(data, order, order.u32_at(data, 4)? as usize)?;
    let exif = match ifd0.find(TAG_EXIF_IFD) {
        Some(entry) => {
            let offset = order.u32_at(&entry.value, 0)? as usize;
            Some(read_ifd(data, order, offset).context("Bad Exif IFD")?)
        }
        None => None,
    };
    Ok((ifd0, exif))
}

fn ascii_value(data: &[u8], order: ByteOrder, entry: &Entry) -> Option<String> {
    if entry.kind != TYPE_ASCII {
        return None;
    }
    let len = entry.count as usize;
    let bytes = if len <= 4 {
        &entry.value[..len]
    } else {
        let offset = order.u32_at(&entry.value, 0).ok()? as usize;
        data.get(offset..offset + len)?
    };
    let text = String::from_utf8_lossy(bytes);
    Some(text.trim_end_matches('\0').trim().to_string())
}

/// Read DateTime, DateTimeOriginal and DateTimeDigitized as stored.
pub(crate) fn read_dates(data: &[u8]) -> Result<TiffDates> {
    let order = ByteOrder::detect(data)?;
    let (ifd0, exif) = read_directories(data, order)?;

    let lookup = |ifd: Option<&Ifd>, tag| {
        ifd.and_then(|ifd| ifd.find(tag))
            .and_then(|e| ascii_value(data, order, e))
    };
    Ok(TiffDates {
        date_time: lookup(Some(&ifd0), TAG_DATE_TIME),
        date_time_original: lookup(exif.as_ref(), TAG_DATE_TIME_ORIGINAL),
        date_time_digitized: lookup(exif.as_ref(), TAG_DATE_TIME_DIGITIZED),
    })
}

/// Set the three date tags to `value` (`YYYY:MM:DD HH:MM:SS`).
///
/// When all three tags already exist with the same length they are
/// overwritten where they sit. Otherwise a new Exif IFD and a new IFD0 are
/// appended and the header is pointed at them; every other entry is copied
/// unchanged, and since nothing already in the file moves, their offsets
/// stay valid.
pub(crate) fn set_dates(data: &[u8], value: &str) -> Result<Vec<u8>> {
    let order = ByteOrder::detect(data)?;
    let (ifd0, exif) = read_directories(data, order)?;

    let mut ascii = value.as_bytes().to_vec();
    ascii.push(0);
    let ascii_len = u32::try_from(ascii.len()).context("Date value too long")?;

    let mut out = data.to_vec();

    if let Some(exif) = &exif {
        let slots = [
            ifd0.find(TAG_DATE_TIME),
            exif.find(TAG_DATE_TIME_ORIGINAL),
            exif.find(TAG_DATE_TIME_DIGITIZED),
        ];
        let reusable = slots
            .iter()
            .all(|s| s.is_some_and(|e| e.kind == TYPE_ASCII && e.count == ascii_len && ascii_len > 4));
        if reusable {
            for entry in slots.into_iter().flatten() {
                let offset = order.u32_at(&entry.value, 0)? as usize;
                out.get_mut(offset..offset + ascii.len())
                    .context("Date value lies outside TIFF data")?
                    .copy_from_slice(&ascii);
            }
            return Ok(out);
        }
    }

    pad_to_word(&mut out);
    let value_offset = offset_of(&out)?;
    out.extend_from_slice(&ascii);

    let date_entry = |tag| Entry {
        tag,
        kind: TYPE_ASCII,
        count: ascii_len,
        value: order.u32_bytes(value_offset),
    };

    let (mut exif_entries, exif_next) = match exif {
        Some(ifd) => (ifd.entries, ifd.next),
        None => (Vec::new(), 0),
    };
    exif_entries.retain(|e| e.tag != TAG_DATE_TIME_ORIGINAL && e.tag != TAG_DATE_TIME_DIGITIZED);
    exif_entries.push(date_entry(TAG_DATE_TIME_ORIGINAL));
    exif_entries.push(date_entry(TAG_DATE_TIME_DIGITIZED));
    let exif_offset = append_ifd(&mut out, order, exif_entries, exif_next)?;

    let mut ifd0_entries = ifd0.entries;
    ifd0_entries.retain(|e| e.tag != TAG_DATE_TIME && e.tag != TAG_EXIF_IFD);
    ifd0_entries.push(date_entry(TAG_DATE_TIME));
    ifd0_entries.push(Entry {
        tag: TAG_EXIF_IFD,
        kind: TYPE_LONG,
        count: 1,
        value: order.u32_bytes(exif_offset),
    });
    let ifd0_offset = append_ifd(&mut out, order, ifd0_entries, ifd0.next)?;

    out[4..8].copy_from_slice(&order.u32_bytes(ifd0_offset));
    Ok(out)
}

/// Append a directory (entries sorted by tag) and return its offset.
fn append_ifd(out: &mut Vec<u8>, order: ByteOrder, mut entries: Vec<Entry>, next: u32) -> Result<u32> {
    entries.sort_by_key(|e| e.tag);
    let count = u16::try_from(entries.len()).context("Too many IFD entries")?;

    pad_to_word(out);
    let offset = offset_of(out)?;
    out.extend_from_slice(&order.u16_bytes(count));
    for e in &entries {
        out.extend_from_slice(&order.u16_bytes(e.tag));
        out.extend_from_slice(&order.u16_bytes(e.kind));
        out.extend_from_slice(&order.u32_bytes(e.count));
        out.extend_from_slice(&e.value);
    }
    out.extend_from_slice(&order.u32_bytes(next));
    Ok(offset)
}

fn offset_of(out: &[u8]) -> Result<u32> {
    u32::try_from(out.len()).context("TIFF data exceeds 4 GiB")
}

fn pad_to_word(out: &mut Vec<u8>) {
    if out.len() % 2 != 0 {
        out.push(0);
    }
}
