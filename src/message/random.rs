use nom::bytes::complete::take;
use nom::IResult;

use crate::buffer::Buf;
use crate::rng::SeededRng;

/// The 32 byte hello random.
///
/// The leading `gmt_unix_time` is filled with random bytes as well, which
/// keeps seeded runs reproducible and leaks no clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; 32]);

impl Random {
    pub fn new(rng: &mut SeededRng) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        Random(bytes)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, data) = take(32_usize)(input)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(data);
        Ok((input, Random(bytes)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.0);
    }
}
