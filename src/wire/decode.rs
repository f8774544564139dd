//! This module contains a decoder that turns a command stream back into records

use nom::bytes::complete::{tag, take};
use nom::combinator::{all_consuming, fail, flat_map, map, rest};
use nom::error::{context, VerboseError, VerboseErrorKind};
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::sequence::pair;
use nom::IResult;

use crate::error::{Error, Result};

use super::{LaunchRecord, Record, WriteRecord, LAUNCH_ADDRESS, LAUNCH_RAM_OPCODE, WRITE_RAM_OPCODE};

/// Parser result carrying the context of the failing step
type Parsed<'a, T> = IResult<&'a [u8], T, VerboseError<&'a [u8]>>;

/// Parses every record in `stream`
pub fn decode_stream(stream: &[u8]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut input = stream;
    while !input.is_empty() {
        let offset = stream.len() - input.len();
        let (remaining, parsed) = record(input).map_err(|e| Error::MalformedRecord {
            offset,
            reason: reason(e),
        })?;
        records.push(parsed);
        input = remaining;
    }
    Ok(records)
}

/// Picks the innermost context out of a parse failure
fn reason(err: nom::Err<VerboseError<&[u8]>>) -> &'static str {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e
            .errors
            .iter()
            .find_map(|(_, kind)| match kind {
                VerboseErrorKind::Context(c) => Some(*c),
                _ => None,
            })
            .unwrap_or("malformed record"),
        nom::Err::Incomplete(_) => "truncated record",
    }
}

/// One record: little-endian opcode, length byte, then that many parameter bytes
fn record(input: &[u8]) -> Parsed<'_, Record> {
    let (remaining, opcode) = context("truncated header", le_u16)(input)?;
    let (remaining, params) = context("truncated parameters", flat_map(le_u8, |len| take(len)))(remaining)?;
    let (_, parsed) = match opcode {
        WRITE_RAM_OPCODE => map(write_params, Record::Write)(params)?,
        LAUNCH_RAM_OPCODE => map(launch_params, Record::Launch)(params)?,
        _ => return context("unknown opcode", fail)(input),
    };
    Ok((remaining, parsed))
}

/// Write-memory parameters: little-endian address, then the data
fn write_params(params: &[u8]) -> Parsed<'_, WriteRecord> {
    context(
        "write record shorter than its address",
        map(pair(le_u32, rest), |(address, data): (u32, &[u8])| {
            // a length byte can't describe more than MAX_CHUNK data bytes
            WriteRecord::from_chunk(address, data)
        }),
    )(params)
}

/// Launch parameters: exactly the all-ones address
fn launch_params(params: &[u8]) -> Parsed<'_, LaunchRecord> {
    context(
        "unexpected launch parameters",
        map(all_consuming(tag(&LAUNCH_ADDRESS[..])), |_| LaunchRecord),
    )(params)
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::wire::decode::decode_stream;
    use crate::wire::{LaunchRecord, Record, WriteRecord};

    #[test]
    /// A write followed by a launch decodes back into the same records
    fn test_decode() {
        let write = WriteRecord::new(0x8000, vec![1, 2, 3]).unwrap();
        let mut stream = Vec::new();
        write.write_into(&mut stream);
        LaunchRecord.write_into(&mut stream);

        let records = decode_stream(&stream).unwrap();
        assert_eq!(records, [Record::Write(write), Record::Launch(LaunchRecord)]);
    }

    #[test]
    /// Truncated streams report where the broken record starts
    fn test_truncated() {
        let mut stream = Vec::new();
        LaunchRecord.write_into(&mut stream);
        stream.extend_from_slice(&[0x4C, 0xFC, 0x08, 0x00]);

        let err = decode_stream(&stream).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
        assert_eq!(err.to_string(), "malformed record at offset 7: truncated parameters");
    }

    #[test]
    /// Unknown opcodes, odd launch records and short writes are rejected with their reason
    fn test_rejects() {
        let reason = |bytes: &[u8]| decode_stream(bytes).unwrap_err().to_string();
        assert!(reason(&[0x01, 0x10, 0x00]).ends_with("unknown opcode"));
        assert!(reason(&[0x4E, 0xFC, 0x04, 0x00, 0x00, 0x00, 0x00]).ends_with("unexpected launch parameters"));
        assert!(reason(&[0x4C, 0xFC, 0x02, 0x00, 0x00]).ends_with("write record shorter than its address"));
        assert!(reason(&[0x4C]).ends_with("truncated header"));
    }
}
