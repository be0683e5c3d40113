use nom::bytes::complete::take;
use nom::number::complete::be_u24;
use nom::IResult;

use crate::buffer::Buf;
use crate::util::{all_of, put_u24};

/// Certificate message: a chain of DER certificates, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub certificate_list: Vec<Vec<u8>>,
}

impl Certificate {
    pub fn new(certificate_list: Vec<Vec<u8>>) -> Self {
        Certificate { certificate_list }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Certificate> {
        let (input, total_len) = be_u24(input)?;
        let (input, list) = take(total_len)(input)?;
        let (_, certificate_list) = all_of(parse_cert, list)?;

        Ok((input, Certificate { certificate_list }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let total_len: usize = self.certificate_list.iter().map(|c| 3 + c.len()).sum();
        put_u24(output, total_len as u32);

        for cert in &self.certificate_list {
            put_u24(output, cert.len() as u32);
            output.extend_from_slice(cert);
        }
    }

    /// The end-entity certificate.
    pub fn leaf(&self) -> Option<&[u8]> {
        self.certificate_list.first().map(|c| c.as_slice())
    }
}

fn parse_cert(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, len) = be_u24(input)?;
    let (input, data) = take(len)(input)?;
    Ok((input, data.to_vec()))
}
