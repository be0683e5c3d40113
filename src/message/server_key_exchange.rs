use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use super::{DigitallySigned, NamedGroup};
use crate::buffer::Buf;

/// ECParameters curve type. Only named curves are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveType {
    NamedCurve,
    Unknown(u8),
}

impl CurveType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            3 => CurveType::NamedCurve,
            _ => CurveType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CurveType::NamedCurve => 3,
            CurveType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CurveType> {
        let (input, value) = be_u8(input)?;
        Ok((input, CurveType::from_u8(value)))
    }
}

/// ServerKeyExchange for ECDHE: the server's ephemeral key, signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub named_group: NamedGroup,
    pub public_key: Vec<u8>,
    pub signed: DigitallySigned,
}

impl ServerKeyExchange {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerKeyExchange> {
        let (rest, curve_type) = CurveType::parse(input)?;
        if curve_type != CurveType::NamedCurve {
            return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
        }
        let (rest, named_group) = NamedGroup::parse(rest)?;
        let (rest, public_key_len) = be_u8(rest)?;
        let (rest, public_key) = take(public_key_len)(rest)?;
        let (rest, signed) = DigitallySigned::parse(rest)?;

        Ok((
            rest,
            ServerKeyExchange {
                named_group,
                public_key: public_key.to_vec(),
                signed,
            },
        ))
    }

    /// Write the ServerECDHParams, the part covered by the signature.
    pub fn serialize_params(&self, output: &mut Buf) {
        output.push(CurveType::NamedCurve.as_u8());
        output.extend_from_slice(&self.named_group.as_u16().to_be_bytes());
        output.push(self.public_key.len() as u8);
        output.extend_from_slice(&self.public_key);
    }

    /// The bytes the server signs: both hello randoms followed by the params.
    pub fn signed_data(&self, client_random: &[u8], server_random: &[u8]) -> Buf {
        let mut data = Buf::new();
        data.extend_from_slice(client_random);
        data.extend_from_slice(server_random);
        self.serialize_params(&mut data);
        data
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.serialize_params(output);
        self.signed.serialize(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SignatureAndHashAlgorithm;

    const MESSAGE: &[u8] = &[
        0x03, // named_curve
        0x00, 0x17, // secp256r1
        0x04, // Public key length
        0x01, 0x02, 0x03, 0x04, // Public key
        0x04, 0x03, // ecdsa_secp256r1_sha256
        0x00, 0x02, // Signature length
        0x05, 0x06, // Signature
    ];

    #[test]
    fn parse_named_curve() {
        let (rest, ske) = ServerKeyExchange::parse(MESSAGE).unwrap();
        assert!(rest.is_empty());
        assert_eq!(ske.named_group, NamedGroup::Secp256r1);
        assert_eq!(ske.public_key, vec![1, 2, 3, 4]);
        assert_eq!(ske.signed.algorithm, SignatureAndHashAlgorithm::supported()[0]);

        let mut out = Buf::new();
        ske.serialize(&mut out);
        assert_eq!(&*out, MESSAGE);
    }

    #[test]
    fn signed_data_covers_randoms_and_params() {
        let (_, ske) = ServerKeyExchange::parse(MESSAGE).unwrap();
        let data = ske.signed_data(&[0xAA; 32], &[0xBB; 32]);
        assert_eq!(data.len(), 64 + 8);
        assert_eq!(&data[64..], &MESSAGE[..8]);
    }

    #[test]
    fn explicit_curve_rejected() {
        let mut message = MESSAGE.to_vec();
        message[0] = 0x01;
        assert!(ServerKeyExchange::parse(&message).is_err());
    }
}
