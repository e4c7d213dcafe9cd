//! ABV tile-call streams.
//!
//! A stream is a space-separated token sequence: one header token, then
//! alternating hex band indices and call bodies. The character at offset
//! `i` of a body is the call for position `i` of that band. Bands appear
//! in ascending order.

use log::{debug, info};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::alphabet::{self, Symbol, NO_CALL_SYMBOL};
use crate::catalog::RuleBook;
use crate::error::{Result, TileError};
use crate::model::{Block, CoordinateRange, Individual};

pub const FILE_EXTENSION: &str = "abv";

/// Pulls whitespace-delimited tokens off a reader one at a time.
struct Tokens<R> {
    reader: R,
    chunk: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

impl<R: BufRead> Tokens<R> {
    fn new(reader: R) -> Self {
        Tokens {
            reader,
            chunk: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    fn next_token(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            self.chunk.clear();
            if self.reader.read_until(b' ', &mut self.chunk)? == 0 {
                return Ok(None);
            }
            self.pending.extend(
                self.chunk
                    .split(|b| b.is_ascii_whitespace())
                    .filter(|t| !t.is_empty())
                    .map(<[u8]>::to_vec),
            );
        }
    }
}

/// Decode one ABV stream into an Individual named `name`.
/// `path` is only used for error context.
pub fn decode<R: BufRead>(
    reader: R,
    name: &str,
    path: &Path,
    range: &CoordinateRange,
    rules: Option<&RuleBook>,
) -> Result<Individual> {
    let mut human = Individual::new(name);
    let mut tokens = Tokens::new(reader);

    // Header, e.g. "huFE71F3".
    if tokens.next_token().map_err(|e| read_failed(path, e))?.is_none() {
        return Ok(human);
    }

    let mut in_body = false;
    let mut band = 0u32;
    while let Some(token) = tokens.next_token().map_err(|e| read_failed(path, e))? {
        if !in_body {
            band = parse_band(&token).ok_or_else(|| TileError::InvalidBand {
                path: path.to_path_buf(),
                token: String::from_utf8_lossy(&token).into_owned(),
            })?;
            if range.band_past_end(band) {
                break;
            }
        } else {
            decode_body(&token, band, &mut human, path, range, rules)?;
        }
        in_body = !in_body;
    }

    debug!("{}: {} blocks", human.name, human.block_count());
    Ok(human)
}

fn read_failed(path: &Path, source: io::Error) -> TileError {
    TileError::ReadFailed {
        path: path.to_path_buf(),
        source,
    }
}

fn parse_band(token: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(token).ok()?;
    u32::from_str_radix(text, 16).ok()
}

fn decode_body(
    body: &[u8],
    band: u32,
    human: &mut Individual,
    path: &Path,
    range: &CoordinateRange,
    rules: Option<&RuleBook>,
) -> Result<()> {
    for (i, &c) in body.iter().enumerate() {
        let pos = i as u32;
        if range.pos_past_end(pos) {
            break;
        }
        let variant = match alphabet::decode(c) {
            Some(Symbol::Variant(v)) => v,
            Some(Symbol::NoCall) => continue,
            None => {
                return Err(TileError::InvalidSymbol {
                    path: path.to_path_buf(),
                    band,
                    pos,
                    symbol: c as char,
                })
            }
        };
        // Below the window: validated above, never stored.
        if band < range.start_band || pos < range.start_pos {
            continue;
        }

        let factor = match rules {
            Some(book) => Some(book.factor(band, pos, variant as u32).ok_or_else(|| {
                TileError::MissingRule {
                    path: path.to_path_buf(),
                    band,
                    pos,
                    variant,
                }
            })?),
            None => None,
        };

        human.insert(Block {
            band,
            pos,
            variant,
            factor,
        });
    }
    Ok(())
}

/// Decode an `.abv` file; the sample is named after the file stem.
pub fn decode_file(
    path: &Path,
    range: &CoordinateRange,
    rules: Option<&RuleBook>,
) -> Result<Individual> {
    let file = File::open(path).map_err(|source| TileError::InputNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    decode(BufReader::new(file), &name, path, range, rules)
}

/// Decode every file in parallel, keeping input order as cohort order.
pub fn decode_cohort(
    paths: &[PathBuf],
    range: &CoordinateRange,
    rules: Option<&RuleBook>,
) -> Result<Vec<Individual>> {
    info!("Decoding {} ABV files...", paths.len());
    let cohort: Vec<Individual> = paths
        .par_iter()
        .map(|p| decode_file(p, range, rules))
        .collect::<Result<_>>()?;
    info!(
        "Decoded {} blocks",
        cohort.iter().map(Individual::block_count).sum::<usize>()
    );
    Ok(cohort)
}

/// Serialize an Individual back to ABV text. Uncalled positions inside a
/// band's span are written as no-calls.
pub fn write<W: Write>(human: &Individual, header: &str, mut w: W) -> Result<()> {
    w.write_all(header.as_bytes())?;
    let mut body = Vec::new();
    for band in human.bands() {
        let row = &human.blocks[&band];
        let last = row.keys().copied().max().unwrap_or(0);
        body.clear();
        for pos in 0..=last {
            body.push(match row.get(&pos) {
                Some(b) => alphabet::encode(b.variant as u32)?,
                None => NO_CALL_SYMBOL,
            });
        }
        write!(w, " {band:x} ")?;
        w.write_all(&body)?;
    }
    w.write_all(b"\n")?;
    Ok(())
}

/// Write an Individual to an `.abv` file at `path`.
pub fn write_file(human: &Individual, header: &str, path: &Path) -> Result<()> {
    let write_failed = |source: io::Error| TileError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(write_failed)?);
    write(human, header, &mut out)
        .and_then(|()| out.flush().map_err(TileError::from))
        .map_err(|e| match e {
            TileError::Io(source) => write_failed(source),
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str, range: CoordinateRange) -> Result<Individual> {
        decode(Cursor::new(text), "hu01", Path::new("hu01.abv"), &range, None)
    }

    #[test]
    fn four_defaults_yield_four_blocks() {
        let h = parse("huFE71F3 1a ....", CoordinateRange::unbounded()).unwrap();
        assert_eq!(h.block_count(), 4);
        for pos in 0..4 {
            let b = h.get(0x1a, pos).unwrap();
            assert_eq!((b.band, b.pos, b.variant), (0x1a, pos, 0));
            assert_eq!(b.factor, None);
        }
        assert_eq!((h.max_band, h.max_pos), (Some(0x1a), Some(3)));
    }

    #[test]
    fn end_pos_filters_before_insertion_and_extent_follows_accepted_blocks() {
        let range = CoordinateRange { end_pos: Some(1), ..CoordinateRange::unbounded() };
        let h = parse("H 0 ....", range).unwrap();
        assert_eq!(h.block_count(), 2);
        assert!(h.get(0, 0).is_some() && h.get(0, 1).is_some());
        assert!(h.get(0, 2).is_none() && h.get(0, 3).is_none());
        assert_eq!(h.max_pos, Some(1));
    }

    #[test]
    fn lower_bounds_skip_blocks() {
        let range = CoordinateRange { start_band: 1, start_pos: 2, ..CoordinateRange::unbounded() };
        let h = parse("H 0 .... 1 .BC/", range).unwrap();
        assert_eq!(h.block_count(), 2);
        assert_eq!(h.get(1, 2).unwrap().variant, 2);
        assert_eq!(h.get(1, 3).unwrap().variant, 63);
        assert_eq!((h.max_band, h.max_pos), (Some(1), Some(3)));
    }

    #[test]
    fn symbols_below_either_lower_bound_are_still_validated() {
        let range = CoordinateRange { start_band: 1, start_pos: 2, ..CoordinateRange::unbounded() };
        for (text, at) in [("H 0 .!.. 1 ..BC", (0, 1)), ("H 0 .... 1 !.BC", (1, 0))] {
            match parse(text, range) {
                Err(TileError::InvalidSymbol { band, pos, .. }) => assert_eq!((band, pos), at),
                other => panic!("expected InvalidSymbol for {text}, got {other:?}"),
            }
        }
    }

    #[test]
    fn decoding_stops_past_end_band() {
        let range = CoordinateRange { end_band: Some(1), ..CoordinateRange::unbounded() };
        // The body of band 2 is invalid but must never be read.
        let h = parse("H 0 .. 1 B 2 !!!!", range).unwrap();
        assert_eq!(h.bands(), vec![0, 1]);
        assert_eq!(h.max_band, Some(1));
    }

    #[test]
    fn no_call_markers_leave_gaps() {
        let h = parse("H 0 .-#B", CoordinateRange::unbounded()).unwrap();
        assert_eq!(h.block_count(), 2);
        assert!(h.get(0, 1).is_none() && h.get(0, 2).is_none());
        assert_eq!(h.get(0, 3).unwrap().variant, 1);
    }

    #[test]
    fn invalid_symbol_is_fatal_with_context() {
        match parse("H 0 ..!.", CoordinateRange::unbounded()) {
            Err(TileError::InvalidSymbol { band, pos, symbol, .. }) => {
                assert_eq!((band, pos, symbol), (0, 2, '!'));
            }
            other => panic!("expected InvalidSymbol, got {other:?}"),
        }
    }

    #[test]
    fn bad_band_token_is_fatal() {
        assert!(matches!(
            parse("H zz ....", CoordinateRange::unbounded()),
            Err(TileError::InvalidBand { .. })
        ));
    }

    #[test]
    fn empty_and_dangling_streams_are_not_errors() {
        assert_eq!(parse("", CoordinateRange::unbounded()).unwrap().block_count(), 0);
        assert_eq!(parse("H", CoordinateRange::unbounded()).unwrap().block_count(), 0);
        let h = parse("H 0 .. 1", CoordinateRange::unbounded()).unwrap();
        assert_eq!(h.block_count(), 2);
        assert_eq!(h.max_band, Some(0));
    }

    #[test]
    fn newlines_separate_tokens_too() {
        let h = parse("H\n0 ..\n1 B\n", CoordinateRange::unbounded()).unwrap();
        assert_eq!(h.block_count(), 3);
        assert_eq!(h.get(1, 0).unwrap().variant, 1);
    }

    #[test]
    fn rule_book_enriches_factor() {
        let mut book = RuleBook::default();
        book.insert(0, 0, 0, 11);
        book.insert(0, 1, 1, 22);
        let all = CoordinateRange::unbounded();
        let h = decode(Cursor::new("H 0 .B"), "x", Path::new("x"), &all, Some(&book)).unwrap();
        assert_eq!(h.get(0, 0).unwrap().factor, Some(11));
        assert_eq!(h.get(0, 1).unwrap().factor, Some(22));

        let missing = decode(Cursor::new("H 0 .C"), "x", Path::new("x"), &all, Some(&book));
        assert!(matches!(missing, Err(TileError::MissingRule { pos: 1, variant: 2, .. })));
    }

    #[test]
    fn written_stream_decodes_to_same_blocks() {
        let src = parse("hu01 0 .B-C 3 --/ 1a .", CoordinateRange::unbounded()).unwrap();
        let mut out = Vec::new();
        write(&src, "hu01", &mut out).unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), "hu01 0 .B-C 3 --/ 1a .\n");

        let back = parse(std::str::from_utf8(&out).unwrap(), CoordinateRange::unbounded()).unwrap();
        assert_eq!(back.blocks, src.blocks);
    }

    #[test]
    fn cohort_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = ["b", "a", "c"]
            .iter()
            .map(|n| {
                let p = dir.path().join(format!("{n}.abv"));
                std::fs::write(&p, format!("hu{n} 0 .B")).unwrap();
                p
            })
            .collect();
        let cohort = decode_cohort(&paths, &CoordinateRange::unbounded(), None).unwrap();
        let names: Vec<&str> = cohort.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert!(cohort.iter().all(|h| h.block_count() == 2));
    }

    struct Unreadable;

    impl io::Read for Unreadable {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device gone"))
        }
    }

    #[test]
    fn read_errors_name_the_stream() {
        let all = CoordinateRange::unbounded();
        let err = decode(BufReader::new(Unreadable), "x", Path::new("lost.abv"), &all, None)
            .unwrap_err();
        match &err {
            TileError::ReadFailed { path, .. } => assert_eq!(path, Path::new("lost.abv")),
            other => panic!("expected ReadFailed, got {other:?}"),
        }
        assert!(err.to_string().contains("lost.abv"), "{err}");
    }

    #[test]
    fn write_file_errors_name_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("hu01.abv");
        let err = write_file(&Individual::new("hu01"), "hu01", &target).unwrap_err();
        assert!(matches!(err, TileError::WriteFailed { .. }));
        assert!(err.to_string().contains("hu01.abv"), "{err}");

        let ok = dir.path().join("hu01.abv");
        let h = parse("hu01 2 .B", CoordinateRange::unbounded()).unwrap();
        write_file(&h, "hu01", &ok).unwrap();
        assert_eq!(std::fs::read_to_string(&ok).unwrap(), "hu01 2 .B\n");
    }

    #[test]
    fn missing_file_is_input_not_found() {
        let all = CoordinateRange::unbounded();
        let err = decode_file(Path::new("/nonexistent/hu.abv"), &all, None);
        assert!(matches!(err, Err(TileError::InputNotFound { .. })));
    }
}
