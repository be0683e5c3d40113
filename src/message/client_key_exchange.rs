use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::buffer::Buf;

/// ClientKeyExchange for ECDHE: the client's ephemeral public point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub public_key: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn new(public_key: &[u8]) -> Self {
        ClientKeyExchange {
            public_key: public_key.to_vec(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientKeyExchange> {
        let (input, len) = be_u8(input)?;
        let (input, public_key) = take(len)(input)?;
        Ok((input, ClientKeyExchange::new(public_key)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.push(self.public_key.len() as u8);
        output.extend_from_slice(&self.public_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefixed_point() {
        let message = [0x03, 0x04, 0xAA, 0xBB];
        let (rest, cke) = ClientKeyExchange::parse(&message).unwrap();
        assert!(rest.is_empty());
        assert_eq!(cke.public_key, vec![0x04, 0xAA, 0xBB]);

        let mut out = Buf::new();
        cke.serialize(&mut out);
        assert_eq!(&*out, &message);
        assert!(ClientKeyExchange::parse(&message[..3]).is_err());
    }
}
