use nom::IResult;

use super::{CipherSuite, CompressionMethod, Extension, ExtensionType, ProtocolVersion};
use super::{Random, SessionId, UseSrtpExtension};
use crate::buffer::Buf;

/// ServerHello with the extensions a DTLS-SRTP server echoes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: CompressionMethod,
    pub use_srtp: Option<UseSrtpExtension>,
    pub extended_master_secret: bool,
    pub renegotiation_info: bool,
}

impl ServerHello {
    pub fn new(random: Random, session_id: SessionId, cipher_suite: CipherSuite) -> Self {
        ServerHello {
            server_version: ProtocolVersion::DTLS1_2,
            random,
            session_id,
            cipher_suite,
            compression_method: CompressionMethod::Null,
            use_srtp: None,
            extended_master_secret: false,
            renegotiation_info: false,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = CompressionMethod::parse(input)?;
        let (input, extensions) = Extension::parse_block(input)?;

        let mut hello = ServerHello {
            server_version,
            random,
            session_id,
            cipher_suite,
            compression_method,
            use_srtp: None,
            extended_master_secret: false,
            renegotiation_info: false,
        };

        for ext in extensions {
            match ext.extension_type {
                ExtensionType::UseSrtp => {
                    hello.use_srtp = Some(UseSrtpExtension::parse(ext.extension_data)?.1);
                }
                ExtensionType::ExtendedMasterSecret => hello.extended_master_secret = true,
                ExtensionType::RenegotiationInfo => hello.renegotiation_info = true,
                _ => {
                    trace!("Ignore ServerHello extension: {:?}", ext.extension_type);
                }
            }
        }

        Ok((input, hello))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.server_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        output.extend_from_slice(&self.cipher_suite.as_u16().to_be_bytes());
        output.push(self.compression_method.as_u8());

        Extension::write_block(output, |output| {
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
