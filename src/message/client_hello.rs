use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::{CipherSuite, CompressionMethod, Cookie, Extension, ExtensionType, NamedGroup};
use super::{ProtocolVersion, Random, SessionId, SignatureAndHashAlgorithm, UseSrtpExtension};
use crate::buffer::Buf;
use crate::util::all_of;

/// ClientHello with its extensions decoded into the fields we use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<CompressionMethod>,
    pub supported_groups: Vec<NamedGroup>,
    pub signature_algorithms: Vec<SignatureAndHashAlgorithm>,
    pub use_srtp: Option<UseSrtpExtension>,
    pub extended_master_secret: bool,
    pub renegotiation_info: bool,
}

impl ClientHello {
    pub fn new(random: Random, cipher_suites: Vec<CipherSuite>) -> Self {
        ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random,
            session_id: SessionId::empty(),
            cookie: Cookie::empty(),
            cipher_suites,
            compression_methods: vec![CompressionMethod::Null],
            supported_groups: Vec::new(),
            signature_algorithms: Vec::new(),
            use_srtp: None,
            extended_master_secret: false,
            renegotiation_info: false,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        let (input, cipher_suites_len) = be_u16(input)?;
        let (input, input_cipher) = take(cipher_suites_len)(input)?;
        let (_, cipher_suites) = all_of(CipherSuite::parse, input_cipher)?;

        let (input, compression_methods_len) = be_u8(input)?;
        let (input, input_compression) = take(compression_methods_len)(input)?;
        let (_, compression_methods) = all_of(CompressionMethod::parse, input_compression)?;

        if cipher_suites.is_empty() || compression_methods.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (input, extensions) = Extension::parse_block(input)?;

        let mut hello = ClientHello {
            client_version,
            random,
            session_id,
            cookie,
            cipher_suites,
            compression_methods,
            supported_groups: Vec::new(),
            signature_algorithms: Vec::new(),
            use_srtp: None,
            extended_master_secret: false,
            renegotiation_info: false,
        };

        for ext in extensions {
            let data = ext.extension_data;
            match ext.extension_type {
                ExtensionType::SupportedGroups => {
                    let (data, len) = be_u16(data)?;
                    let (_, groups) = take(len)(data)?;
                    hello.supported_groups = all_of(NamedGroup::parse, groups)?.1;
                }
                ExtensionType::SignatureAlgorithms => {
                    let (data, len) = be_u16(data)?;
                    let (_, algs) = take(len)(data)?;
                    hello.signature_algorithms = all_of(SignatureAndHashAlgorithm::parse, algs)?.1;
                }
                ExtensionType::UseSrtp => {
                    hello.use_srtp = Some(UseSrtpExtension::parse(data)?.1);
                }
                ExtensionType::ExtendedMasterSecret => hello.extended_master_secret = true,
                ExtensionType::RenegotiationInfo => hello.renegotiation_info = true,
                _ => {}
            }
        }

        Ok((input, hello))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cookie.serialize(output);

        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            output.extend_from_slice(&suite.as_u16().to_be_bytes());
        }

        output.push(self.compression_methods.len() as u8);
        for method in &self.compression_methods {
            output.push(method.as_u8());
        }

        Extension::write_block(output, |output| {
            if !self.supported_groups.is_empty() {
                Extension::write(output, ExtensionType::SupportedGroups, |out| {
                    let len = (self.supported_groups.len() * 2) as u16;
                    out.extend_from_slice(&len.to_be_bytes());
                    for group in &self.supported_groups {
                        out.extend_from_slice(&group.as_u16().to_be_bytes());
                    }
                });
                // Uncompressed points only.
                Extension::write(output, ExtensionType::EcPointFormats, |out| {
                    out.extend_from_slice(&[1, 0]);
                });
            }

            if !self.signature_algorithms.is_empty() {
                Extension::write(output, ExtensionType::SignatureAlgorithms, |out| {
                    let len = (self.signature_algorithms.len() * 2) as u16;
                    out.extend_from_slice(&len.to_be_bytes());
                    for alg in &self.signature_algorithms {
                        out.extend_from_slice(&alg.as_u16().to_be_bytes());
                    }
                });
            }

            if let Some(use_srtp) = &self.use_srtp {
                Extension::write(output, ExtensionType::UseSrtp, |out| use_srtp.serialize(out));
            }

            if self.extended_master_secret {
                Extension::write(output, ExtensionType::ExtendedMasterSecret, |_| {});
            }

            if self.renegotiation_info {
                Extension::write(output, ExtensionType::RenegotiationInfo, |out| out.push(0));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SrtpProfile;

    const MESSAGE: &[u8] = &[
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        // Random
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E,
        0x1F, 0x20, //
        0x00, // SessionId length
        0x01, // Cookie length
        0xBB, // Cookie
        0x00, 0x04, // CipherSuites length
        0xC0, 0x2C, // TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
        0xC0, 0x2B, // TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
        0x01, // CompressionMethods length
        0x00, // CompressionMethod::Null
        0x00, 0x23, // Extensions length
        0x00, 0x0A, 0x00, 0x04, 0x00, 0x02, 0x00, 0x17, // supported_groups: secp256r1
        0x00, 0x0B, 0x00, 0x02, 0x01, 0x00, // ec_point_formats: uncompressed
        0x00, 0x0D, 0x00, 0x04, 0x00, 0x02, 0x04, 0x03, // signature_algorithms
        0x00, 0x0E, 0x00, 0x05, 0x00, 0x02, 0x00, 0x07, 0x00, // use_srtp
        0x00, 0x17, 0x00, 0x00, // extended_master_secret
    ];

    fn hello() -> ClientHello {
        let random = Random::parse(&MESSAGE[2..34]).unwrap().1;
        let mut hello = ClientHello::new(
            random,
            vec![
                CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
                CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            ],
        );
        hello.cookie = Cookie::try_new(&[0xBB]).unwrap();
        hello.supported_groups = vec![NamedGroup::Secp256r1];
        hello.signature_algorithms = vec![SignatureAndHashAlgorithm::supported()[0]];
        hello.use_srtp = Some(UseSrtpExtension::new(&[SrtpProfile::AeadAes128Gcm]));
        hello.extended_master_secret = true;
        hello
    }

    #[test]
    fn serialize_with_extensions() {
        let mut serialized = Buf::new();
        hello().serialize(&mut serialized);
        assert_eq!(&*serialized, MESSAGE);

        let (rest, parsed) = ClientHello::parse(&serialized).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello());
    }

    #[test]
    fn cookie_too_long() {
        let mut message = MESSAGE.to_vec();
        message[35] = 0xFF;
        assert!(ClientHello::parse(&message).is_err());
    }

    #[test]
    fn no_cipher_suites() {
        let mut message = MESSAGE[..37].to_vec();
        message.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]);
        assert!(ClientHello::parse(&message).is_err());
    }
}
