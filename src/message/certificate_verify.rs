use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use super::SignatureAndHashAlgorithm;
use crate::buffer::Buf;

/// A signature together with the scheme that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub algorithm: SignatureAndHashAlgorithm,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    pub fn new(algorithm: SignatureAndHashAlgorithm, signature: Vec<u8>) -> Self {
        DigitallySigned {
            algorithm,
            signature,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], DigitallySigned> {
        let (input, algorithm) = SignatureAndHashAlgorithm::parse(input)?;
        let (input, len) = be_u16(input)?;
        let (input, signature) = take(len)(input)?;

        Ok((
            input,
            DigitallySigned {
                algorithm,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.algorithm.as_u16().to_be_bytes());
        output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.signature);
    }
}

/// CertificateVerify: signature over the handshake transcript so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signed: DigitallySigned,
}

impl CertificateVerify {
    pub fn new(signed: DigitallySigned) -> Self {
        CertificateVerify { signed }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateVerify> {
        let (input, signed) = DigitallySigned::parse(input)?;
        Ok((input, CertificateVerify { signed }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.signed.serialize(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HashAlgorithm, SignatureAlgorithm};

    const MESSAGE: &[u8] = &[
        0x04, 0x03, // ecdsa_secp256r1_sha256
        0x00, 0x04, // Signature length
        0x01, 0x02, 0x03, 0x04, // Signature
    ];

    #[test]
    fn parse_ecdsa_sha256() {
        let (rest, cv) = CertificateVerify::parse(MESSAGE).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            cv.signed.algorithm,
            SignatureAndHashAlgorithm::new(HashAlgorithm::SHA256, SignatureAlgorithm::ECDSA)
        );

        let mut out = Buf::new();
        cv.serialize(&mut out);
        assert_eq!(&*out, MESSAGE);
    }

    #[test]
    fn signature_shorter_than_declared() {
        assert!(CertificateVerify::parse(&MESSAGE[..6]).is_err());
    }
}
