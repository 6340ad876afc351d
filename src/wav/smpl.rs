//! RIFF chunk walk and `smpl` loop parsing
//!
//! hound skips chunks it does not know, so authored loop points are read in
//! a second pass over the file: headers are parsed one at a time and only
//! the `smpl` body is ever loaded.

use crate::Result;
use nom::bytes::complete::{tag, take};
use nom::multi::count;
use nom::number::complete::le_u32;
use nom::sequence::tuple;
use nom::IResult;
use std::io::{self, Read, Seek, SeekFrom};

const SMPL_ID: &[u8; 4] = b"smpl";

/// Bytes of the `smpl` body before the loop table
const SMPL_PREAMBLE: usize = 28;

/// One 8-byte RIFF chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    pub id: [u8; 4],
    pub size: u32,
}

/// One entry of the `smpl` loop table, in sample frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SampleLoop {
    pub kind: u32,
    pub start_frame: u32,
    /// Inclusive, as written by sample editors
    pub end_frame: u32,
    pub play_count: u32,
}

pub(crate) fn riff_header(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, (_, size, _)) = tuple((tag(&b"RIFF"[..]), le_u32, tag(&b"WAVE"[..])))(input)?;
    Ok((input, size))
}

pub(crate) fn chunk_header(input: &[u8]) -> IResult<&[u8], ChunkHeader> {
    let (input, (id, size)) = tuple((take(4usize), le_u32))(input)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(id);
    Ok((input, ChunkHeader { id: raw, size }))
}

fn sample_loop(input: &[u8]) -> IResult<&[u8], SampleLoop> {
    let (input, (_cue, kind, start_frame, end_frame, _fraction, play_count)) =
        tuple((le_u32, le_u32, le_u32, le_u32, le_u32, le_u32))(input)?;
    Ok((
        input,
        SampleLoop {
            kind,
            start_frame,
            end_frame,
            play_count,
        },
    ))
}

/// Parse a `smpl` chunk body into its loop table
pub(crate) fn smpl_loops(input: &[u8]) -> IResult<&[u8], Vec<SampleLoop>> {
    let (input, _) = take(SMPL_PREAMBLE)(input)?;
    let (input, (loop_count, _sampler_data)) = tuple((le_u32, le_u32))(input)?;
    count(sample_loop, loop_count as usize)(input)
}

fn malformed(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed {what}"))
}

/// Read exactly `buf.len()` bytes, or report a clean end of data
fn read_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Find the first loop of the file's `smpl` chunk, if it has one
pub(crate) fn find_loop<R: Read + Seek>(reader: &mut R) -> Result<Option<SampleLoop>> {
    let mut header = [0u8; 12];
    reader.read_exact(&mut header)?;
    riff_header(&header).map_err(|_| malformed("RIFF header"))?;

    let mut raw = [0u8; 8];
    while read_or_eof(reader, &mut raw)? {
        let (_, chunk) = chunk_header(&raw).map_err(|_| malformed("chunk header"))?;
        if &chunk.id == SMPL_ID {
            let mut body = vec![0u8; chunk.size as usize];
            reader.read_exact(&mut body)?;
            let (_, loops) = smpl_loops(&body).map_err(|_| malformed("smpl chunk"))?;
            return Ok(loops.into_iter().next());
        }
        // Chunks are padded to even sizes
        let skip = i64::from(chunk.size) + i64::from(chunk.size & 1);
        reader.seek(SeekFrom::Current(skip))?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn smpl_body(loops: &[(u32, u32)]) -> Vec<u8> {
        let mut body = vec![0u8; SMPL_PREAMBLE];
        body.extend_from_slice(&(loops.len() as u32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        for (i, (start, end)) in loops.iter().enumerate() {
            for field in [i as u32, 0, *start, *end, 0, 0] {
                body.extend_from_slice(&field.to_le_bytes());
            }
        }
        body
    }

    fn riff(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut out = b"RIFF\0\0\0\0WAVE".to_vec();
        for (id, body) in chunks {
            out.extend_from_slice(*id);
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
            out.extend_from_slice(body);
            if body.len() % 2 == 1 {
                out.push(0);
            }
        }
        out
    }

    #[test]
    fn test_chunk_header() {
        let (rest, header) = chunk_header(b"data\x10\x00\x00\x00xy").unwrap();
        assert_eq!(&header.id, b"data");
        assert_eq!(header.size, 16);
        assert_eq!(rest, b"xy");
    }

    #[test]
    fn test_rejects_non_riff() {
        assert!(riff_header(b"RIFX\0\0\0\0WAVE").is_err());
        let mut cursor = Cursor::new(b"OggS and more bytes".to_vec());
        assert!(find_loop(&mut cursor).is_err());
    }

    #[test]
    fn test_smpl_table() {
        let body = smpl_body(&[(100, 199), (5, 9)]);
        let (_, loops) = smpl_loops(&body).unwrap();
        assert_eq!(loops.len(), 2);
        assert_eq!(loops[0].start_frame, 100);
        assert_eq!(loops[0].end_frame, 199);
    }

    #[test]
    fn test_find_loop_skips_odd_chunks() {
        let file = riff(&[
            (b"fmt ", vec![0; 16]),
            (b"LIST", vec![1, 2, 3]),
            (b"smpl", smpl_body(&[(10, 19)])),
            (b"data", vec![0; 8]),
        ]);
        let found = find_loop(&mut Cursor::new(file)).unwrap().unwrap();
        assert_eq!((found.start_frame, found.end_frame), (10, 19));
    }

    #[test]
    fn test_find_loop_absent() {
        let file = riff(&[(b"fmt ", vec![0; 16]), (b"data", vec![0; 8])]);
        assert_eq!(find_loop(&mut Cursor::new(file)).unwrap(), None);
    }
}
