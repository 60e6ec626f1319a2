use super::conductor::SourceMap;
use super::phases::types::{FileId, Loc};
use crate::spec::types::hw::{Byte, Number, Word, ADDR_SPACE};
use itertools::Itertools;
use std::convert::TryFrom;
use std::fmt::Write;

/// Unwritten bytes are exported as this.
pub const SENTINEL: Byte = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub ip: Number,
    pub op: Number,
}

/*
    `ip` is the address the code will run at, `op` is where its bytes land in the output.
    They advance together; `ORG` moves `ip` (and `op` with it, keeping their difference, the
    skew), while `SEEK` moves only `op` and so changes the skew. The first `ORG` before
    anything has been emitted only sets the skew, so `ORG 0x8000` at the top of a file does
    not produce 32K of padding.
*/
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    pub ip: Number,
    pub op: Number,
    skew: Number,
    origin_set: bool,
    emitted: bool,
}

impl Cursor {
    pub fn position(&self) -> Position {
        Position {
            ip: self.ip,
            op: self.op,
        }
    }

    pub fn org(&mut self, address: Number) {
        if !self.origin_set && !self.emitted {
            self.skew = address - self.op;
        }
        self.origin_set = true;
        self.ip = address;
        self.op = address - self.skew;
    }

    pub fn seek(&mut self, offset: Number) {
        self.op = offset;
        self.skew = self.ip - self.op;
    }

    pub fn advance(&mut self, n: usize) {
        self.ip += n as Number;
        self.op += n as Number;
        self.emitted |= n > 0;
    }

    pub fn in_range(&self, n: usize) -> bool {
        let end = Number::try_from(n).ok().and_then(|n| self.ip.checked_add(n));
        self.ip >= 0 && self.op >= 0 && end.map_or(false, |end| end <= ADDR_SPACE as Number)
    }

    /// `op` trails `ip` by exactly the skew. The fields are public, so writes check it.
    fn check(&self) {
        assert_eq!(
            self.op,
            self.ip - self.skew,
            "output offset is out of step with address {:#X} (skew {:#X})",
            self.ip,
            self.skew
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    pub source: String,
    pub address: Word,
    pub offset: usize,
    pub len: usize,
}

impl ContentBlock {
    pub fn bytes<'o>(&self, output: &'o Output) -> &'o [Byte] {
        &output.bytes[self.offset..self.offset + self.len]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub bytes: Vec<Byte>,
    pub blocks: Vec<ContentBlock>,
    pub listing: String,
}

#[derive(Debug)]
struct RawBlock {
    file: FileId,
    address: Number,
    offset: usize,
    len: usize,
}

#[derive(Debug)]
struct ListEntry {
    loc: Loc,
    address: Number,
    bytes: Vec<Byte>,
}

/// Statement-by-statement record of what was emitted where, rendered against the source
/// text once generation is over.
#[derive(Debug, Default)]
pub struct Listing {
    entries: Vec<ListEntry>,
}

impl Listing {
    pub fn begin(&mut self, loc: Loc, address: Number) {
        match self.entries.last() {
            Some(last) if last.loc.file == loc.file && last.loc.line == loc.line => (),
            _ => self.entries.push(ListEntry {
                loc,
                address,
                bytes: Vec::new(),
            }),
        }
    }

    fn push(&mut self, b: Byte) {
        if let Some(entry) = self.entries.last_mut() {
            entry.bytes.push(b);
        }
    }

    fn render_line(out: &mut String, address: Option<Number>, bytes: &[Byte], width: usize, text: &str) {
        let addr = address.map_or_else(|| "    ".to_owned(), |a| format!("{:04X}", a & 0xFFFF));
        let hex = bytes.iter().map(|b| format!("{:02X}", b)).join(" ");
        let line = format!("{} {:<w$}  {}", addr, hex, text, w = width * 3 - 1);
        let _ = writeln!(out, "{}", line.trim_end());
    }

    pub fn render(&self, sources: &SourceMap, width: usize) -> String {
        let width = width.max(1);
        let mut out = String::new();
        let mut current: Option<FileId> = None;
        let mut printed = vec![0usize; sources.len()];

        for entry in &self.entries {
            let file = entry.loc.file;
            if current != Some(file) {
                let _ = writeln!(out, "; ---- {} ----", sources.name(file));
                current = Some(file);
            }

            for line in printed[file] + 1..entry.loc.line {
                Listing::render_line(&mut out, None, &[], width, sources.line(file, line));
            }
            printed[file] = printed[file].max(entry.loc.line);

            let mut chunks = entry.bytes.chunks(width);
            let first = chunks.next().unwrap_or(&[]);
            Listing::render_line(
                &mut out,
                Some(entry.address),
                first,
                width,
                sources.line(file, entry.loc.line),
            );
            let mut address = entry.address + first.len() as Number;
            for chunk in chunks {
                Listing::render_line(&mut out, Some(address), chunk, width, "");
                address += chunk.len() as Number;
            }
        }

        if let Some(file) = current {
            for line in printed[file] + 1..=sources.line_count(file) {
                Listing::render_line(&mut out, None, &[], width, sources.line(file, line));
            }
        }
        out
    }
}

/// The byte buffer written during generation. `None` marks bytes nothing was written to.
#[derive(Debug, Default)]
pub struct Generator {
    buffer: Vec<Option<Byte>>,
    blocks: Vec<RawBlock>,
    pub listing: Listing,
}

impl Generator {
    pub fn new() -> Self {
        Generator::default()
    }

    /// Write one byte at the cursor and advance it. Writing a value over a value is refused
    /// and reported with the offending address; `None` never replaces anything.
    pub fn write(&mut self, cursor: &mut Cursor, value: Option<Byte>, file: FileId) -> Result<(), Number> {
        cursor.check();
        let (ip, op) = (cursor.ip, cursor.op);
        if !cursor.in_range(1) {
            cursor.advance(1);
            return Ok(());
        }

        let offset = op as usize;
        if self.buffer.len() < offset {
            self.buffer.resize(offset, None);
        }
        let appended = offset == self.buffer.len();
        if appended {
            self.buffer.push(value);
        } else if let Some(b) = value {
            if self.buffer[offset].is_some() {
                return Err(ip);
            }
            self.buffer[offset] = Some(b);
        }

        if appended || (value.is_some() && !self.covered(offset)) {
            self.extend_blocks(ip, offset, file);
        }

        if let Some(b) = value {
            self.listing.push(b);
        }
        cursor.advance(1);
        Ok(())
    }

    fn covered(&self, offset: usize) -> bool {
        self.blocks
            .iter()
            .any(|block| (block.offset..block.offset + block.len).contains(&offset))
    }

    /// Grow the last block by the byte at `offset`, or open a new one if the byte does not
    /// follow on from it in both address and offset.
    fn extend_blocks(&mut self, ip: Number, offset: usize, file: FileId) {
        if let Some(block) = self.blocks.last_mut() {
            if block.address + block.len as Number == ip && block.offset + block.len == offset {
                block.len += 1;
                return;
            }
        }
        log::debug!("new content block at {:04X} (offset {:#X})", ip, offset);
        self.blocks.push(RawBlock {
            file,
            address: ip,
            offset,
            len: 1,
        });
    }

    pub fn finish(self, sources: &SourceMap, list_width: usize) -> Output {
        let listing = self.listing.render(sources, list_width);
        Output {
            bytes: self
                .buffer
                .into_iter()
                .map(|b| b.unwrap_or(SENTINEL))
                .collect(),
            blocks: self
                .blocks
                .into_iter()
                .map(|b| ContentBlock {
                    source: sources.name(b.file).to_owned(),
                    address: b.address as Word,
                    offset: b.offset,
                    len: b.len,
                })
                .collect(),
            listing,
        }
    }
}

const HEX_RECORD_LEN: usize = 16;

fn hex_record(out: &mut String, address: Word, kind: Byte, data: &[Byte]) {
    let mut sum = data.len() as Byte;
    sum = sum
        .wrapping_add((address >> 8) as Byte)
        .wrapping_add(address as Byte)
        .wrapping_add(kind);
    let _ = write!(out, ":{:02X}{:04X}{:02X}", data.len(), address, kind);
    for b in data {
        sum = sum.wrapping_add(*b);
        let _ = write!(out, "{:02X}", b);
    }
    let _ = writeln!(out, "{:02X}", sum.wrapping_neg());
}

/// Render the content blocks as Intel HEX data records, skipping records which would
/// only hold unwritten bytes.
pub fn intel_hex(output: &Output) -> String {
    let mut out = String::new();
    for block in &output.blocks {
        for (i, chunk) in block.bytes(output).chunks(HEX_RECORD_LEN).enumerate() {
            if chunk.iter().all(|b| *b == SENTINEL) {
                continue;
            }
            let address = block.address.wrapping_add((i * HEX_RECORD_LEN) as Word);
            hex_record(&mut out, address, 0x00, chunk);
        }
    }
    hex_record(&mut out, 0, 0x01, &[]);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn sources() -> SourceMap {
        let mut sources = SourceMap::default();
        sources.add("a.asm".to_owned(), None, "one\ntwo\nthree\n".to_owned());
        sources
    }

    fn write_all(gen: &mut Generator, cursor: &mut Cursor, bytes: &[Byte]) {
        for b in bytes {
            gen.write(cursor, Some(*b), 0).unwrap();
        }
    }

    #[test]
    fn org_after_content_pads_and_opens_a_block() {
        let mut gen = Generator::new();
        let mut cursor = Cursor::default();
        write_all(&mut gen, &mut cursor, &[1; 0x10]);
        cursor.org(0x100);
        write_all(&mut gen, &mut cursor, &[2, 3]);

        let out = gen.finish(&sources(), 4);
        assert_eq!(out.bytes.len(), 0x102);
        assert!(out.bytes[0x10..0x100].iter().all(|b| *b == SENTINEL));
        assert_eq!(out.blocks.len(), 2);
        assert_eq!(out.blocks[1].address, 0x100);
        assert_eq!(out.blocks[1].offset, 0x100);
        assert_eq!(out.blocks[1].bytes(&out), &[2, 3]);
    }

    #[test]
    fn first_org_only_sets_the_skew() {
        let mut gen = Generator::new();
        let mut cursor = Cursor::default();
        cursor.org(0x8000);
        write_all(&mut gen, &mut cursor, &[0xAA]);
        let out = gen.finish(&sources(), 4);
        assert_eq!(out.bytes, vec![0xAA]);
        assert_eq!(out.blocks[0].address, 0x8000);
        assert_eq!(out.blocks[0].offset, 0);
    }

    #[test]
    fn overwrites_are_refused_but_gaps_can_be_filled() {
        let mut gen = Generator::new();
        let mut cursor = Cursor::default();
        gen.write(&mut cursor, Some(1), 0).unwrap();
        gen.write(&mut cursor, None, 0).unwrap();
        cursor.org(0);
        gen.write(&mut cursor, None, 0).unwrap();
        gen.write(&mut cursor, Some(2), 0).unwrap();
        cursor.org(0);
        assert_eq!(gen.write(&mut cursor, Some(3), 0), Err(0));

        let out = gen.finish(&sources(), 4);
        assert_eq!(out.bytes, vec![1, 2]);
    }

    #[test]
    fn blocks_only_cover_bytes_once() {
        let mut gen = Generator::new();
        let mut cursor = Cursor::default();
        write_all(&mut gen, &mut cursor, &[1, 2]);
        cursor.org(0);
        gen.write(&mut cursor, None, 0).unwrap();
        gen.write(&mut cursor, None, 0).unwrap();
        cursor.org(4);
        write_all(&mut gen, &mut cursor, &[5]);
        cursor.org(2);
        write_all(&mut gen, &mut cursor, &[3]);

        let out = gen.finish(&sources(), 4);
        assert_eq!(out.bytes, vec![1, 2, 3, SENTINEL, 5]);
        let spans: Vec<_> = out.blocks.iter().map(|b| (b.address, b.offset, b.len)).collect();
        assert_eq!(spans, vec![(0, 0, 2), (4, 4, 1), (2, 2, 1)]);
        assert_eq!(
            intel_hex(&out),
            ":020000000102FB\n:0100040005F6\n:0100020003FA\n:00000001FF\n"
        );
    }

    #[test]
    fn huge_reservations_are_out_of_range() {
        let mut cursor = Cursor::default();
        cursor.org(0xFFFF);
        assert!(cursor.in_range(1));
        assert!(!cursor.in_range(2));
        assert!(!cursor.in_range(usize::MAX));
        cursor.ip = Number::MAX;
        assert!(!cursor.in_range(1));
    }

    #[test]
    #[should_panic(expected = "out of step")]
    fn writes_catch_a_cursor_moved_by_hand() {
        let mut gen = Generator::new();
        let mut cursor = Cursor::default();
        write_all(&mut gen, &mut cursor, &[1]);
        cursor.ip += 1;
        let _ = gen.write(&mut cursor, Some(2), 0);
    }

    #[test]
    fn seek_moves_only_the_offset() {
        let mut cursor = Cursor::default();
        cursor.org(0x4000);
        cursor.seek(0x10);
        assert_eq!(cursor.position(), Position { ip: 0x4000, op: 0x10 });
        cursor.org(0x4100);
        assert_eq!(cursor.position(), Position { ip: 0x4100, op: 0x110 });
    }

    #[test]
    fn hex_records() {
        let output = Output {
            bytes: vec![0x3E, 0x01, SENTINEL],
            blocks: vec![ContentBlock {
                source: "a.asm".to_owned(),
                address: 0x100,
                offset: 0,
                len: 3,
            }],
            listing: String::new(),
        };
        assert_eq!(intel_hex(&output), ":030100003E01FFBE\n:00000001FF\n");
    }

    #[test]
    fn blank_records_are_suppressed() {
        let output = Output {
            bytes: vec![SENTINEL; 20],
            blocks: vec![ContentBlock {
                source: "a.asm".to_owned(),
                address: 0,
                offset: 0,
                len: 20,
            }],
            listing: String::new(),
        };
        assert_eq!(intel_hex(&output), ":00000001FF\n");
    }

    #[test]
    fn listing_columns() {
        let mut listing = Listing::default();
        listing.begin(Loc::new(0, 2, 1), 0x10);
        listing.entries[0].bytes = vec![1, 2, 3, 4, 5];
        let text = listing.render(&sources(), 4);
        let pad = " ".repeat(4 + 1 + 11 + 2);
        let expected = format!(
            "; ---- a.asm ----\n{}one\n0010 01 02 03 04  two\n0014 05\n{}three\n",
            pad, pad
        );
        assert_eq!(text, expected);
    }
}
