use nom::bytes::complete::take;
use nom::IResult;

use crate::buffer::Buf;
use crate::message::CipherSuite;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn new(verify_data: &[u8]) -> Self {
        Finished {
            verify_data: verify_data.to_vec(),
        }
    }

    pub fn parse(input: &[u8], cipher_suite: CipherSuite) -> IResult<&[u8], Finished> {
        let verify_data_length = cipher_suite.verify_data_length();
        let (input, verify_data) = take(verify_data_length)(input)?;
        Ok((input, Finished::new(verify_data)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.verify_data);
    }
}
