use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::util::all_of;

/// A hello extension with its body still undecoded.
#[derive(Debug, PartialEq, Eq)]
pub struct Extension<'a> {
    pub extension_type: ExtensionType,
    pub extension_data: &'a [u8],
}

impl<'a> Extension<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Extension<'a>> {
        let (input, extension_type) = ExtensionType::parse(input)?;
        let (input, extension_length) = be_u16(input)?;
        let (input, extension_data) = take(extension_length)(input)?;

        Ok((
            input,
            Extension {
                extension_type,
                extension_data,
            },
        ))
    }

    /// Parse the optional extensions block that ends a hello message.
    ///
    /// An absent block gives an empty list. A block must be consumed exactly.
    pub fn parse_block(input: &'a [u8]) -> IResult<&'a [u8], Vec<Extension<'a>>> {
        if input.is_empty() {
            return Ok((input, Vec::new()));
        }

        let (input, extensions_len) = be_u16(input)?;
        let (rest, data) = take(extensions_len)(input)?;
        let (_, extensions) = all_of(Extension::parse, data)?;

        let mut seen = Vec::with_capacity(extensions.len());
        for ext in &extensions {
            if seen.contains(&ext.extension_type) {
                return Err(Err::Failure(Error::new(data, ErrorKind::Verify)));
            }
            seen.push(ext.extension_type);
        }

        Ok((rest, extensions))
    }

    /// Write one extension, letting `body` fill in the data.
    pub fn write(output: &mut Buf, extension_type: ExtensionType, body: impl FnOnce(&mut Buf)) {
        output.extend_from_slice(&extension_type.as_u16().to_be_bytes());
        let len_at = output.len();
        output.extend_from_slice(&[0, 0]);
        body(output);
        let len = (output.len() - len_at - 2) as u16;
        output[len_at..len_at + 2].copy_from_slice(&len.to_be_bytes());
    }

    /// Write an extensions block, omitting it entirely when `body` writes nothing.
    pub fn write_block(output: &mut Buf, body: impl FnOnce(&mut Buf)) {
        let len_at = output.len();
        output.extend_from_slice(&[0, 0]);
        body(output);
        let len = output.len() - len_at - 2;
        if len == 0 {
            output.truncate(len_at);
        } else {
            output[len_at..len_at + 2].copy_from_slice(&(len as u16).to_be_bytes());
        }
    }
}

/// Extension types used by a DTLS-SRTP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    UseSrtp,
    ExtendedMasterSecret,
    RenegotiationInfo,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x000A => ExtensionType::SupportedGroups,
            0x000B => ExtensionType::EcPointFormats,
            0x000D => ExtensionType::SignatureAlgorithms,
            0x000E => ExtensionType::UseSrtp,
            0x0017 => ExtensionType::ExtendedMasterSecret,
            0xFF01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::SupportedGroups => 0x000A,
            ExtensionType::EcPointFormats => 0x000B,
            ExtensionType::SignatureAlgorithms => 0x000D,
            ExtensionType::UseSrtp => 0x000E,
            ExtensionType::ExtendedMasterSecret => 0x0017,
            ExtensionType::RenegotiationInfo => 0xFF01,
            ExtensionType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ExtensionType> {
        let (input, value) = be_u16(input)?;
        Ok((input, ExtensionType::from_u16(value)))
    }
}
