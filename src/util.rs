use nom::error::{make_error, ErrorKind, ParseError};
use nom::multi::many0;
use nom::{Err, IResult, Parser};

pub fn be_u48<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], u64, E> {
    const BOUND: usize = 6;

    if input.len() < BOUND {
        return Err(Err::Error(make_error(input, ErrorKind::Eof)));
    }

    let res = input[..BOUND]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64);

    Ok((&input[BOUND..], res))
}

/// Parse every item in `input`, failing unless the parser consumes it completely.
pub fn all_of<'a, O, F>(f: F, input: &'a [u8]) -> IResult<&'a [u8], Vec<O>>
where
    F: Parser<&'a [u8], O, nom::error::Error<&'a [u8]>>,
{
    let (rest, items) = many0(f)(input)?;
    if !rest.is_empty() {
        return Err(Err::Failure(make_error(rest, ErrorKind::Eof)));
    }
    Ok((rest, items))
}

/// Write a big-endian u24.
pub fn put_u24(out: &mut crate::buffer::Buf, v: u32) {
    out.extend_from_slice(&v.to_be_bytes()[1..]);
}
