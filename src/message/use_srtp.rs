use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::util::all_of;
use crate::SrtpProfile;

/// DTLS-SRTP protection profile identifiers (RFC 5764 4.1.2, RFC 7714 14.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum SrtpProfileId {
    SRTP_AES128_CM_SHA1_80,
    SRTP_AEAD_AES_128_GCM,
    SRTP_AEAD_AES_256_GCM,
    Unknown(u16),
}

impl SrtpProfileId {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => SrtpProfileId::SRTP_AES128_CM_SHA1_80,
            0x0007 => SrtpProfileId::SRTP_AEAD_AES_128_GCM,
            0x0008 => SrtpProfileId::SRTP_AEAD_AES_256_GCM,
            _ => SrtpProfileId::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            SrtpProfileId::SRTP_AES128_CM_SHA1_80 => 0x0001,
            SrtpProfileId::SRTP_AEAD_AES_128_GCM => 0x0007,
            SrtpProfileId::SRTP_AEAD_AES_256_GCM => 0x0008,
            SrtpProfileId::Unknown(v) => *v,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SrtpProfileId> {
        let (input, value) = be_u16(input)?;
        Ok((input, SrtpProfileId::from_u16(value)))
    }

    pub fn profile(&self) -> Option<SrtpProfile> {
        match self {
            SrtpProfileId::SRTP_AES128_CM_SHA1_80 => Some(SrtpProfile::Aes128CmSha1_80),
            SrtpProfileId::SRTP_AEAD_AES_128_GCM => Some(SrtpProfile::AeadAes128Gcm),
            SrtpProfileId::SRTP_AEAD_AES_256_GCM => Some(SrtpProfile::AeadAes256Gcm),
            SrtpProfileId::Unknown(_) => None,
        }
    }
}

impl From<SrtpProfile> for SrtpProfileId {
    fn from(profile: SrtpProfile) -> Self {
        match profile {
            SrtpProfile::Aes128CmSha1_80 => SrtpProfileId::SRTP_AES128_CM_SHA1_80,
            SrtpProfile::AeadAes128Gcm => SrtpProfileId::SRTP_AEAD_AES_128_GCM,
            SrtpProfile::AeadAes256Gcm => SrtpProfileId::SRTP_AEAD_AES_256_GCM,
        }
    }
}

/// use_srtp extension (RFC 5764 4.1.1).
///
/// Unknown profile ids are kept so a server reply naming one can be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseSrtpExtension {
    pub profiles: Vec<SrtpProfileId>,
    pub mki: Vec<u8>,
}

impl UseSrtpExtension {
    pub fn new(profiles: &[SrtpProfile]) -> Self {
        UseSrtpExtension {
            profiles: profiles.iter().copied().map(SrtpProfileId::from).collect(),
            mki: Vec::new(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], UseSrtpExtension> {
        let (rest, profiles_length) = be_u16(input)?;
        if profiles_length % 2 != 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (rest, profiles_data) = take(profiles_length)(rest)?;
        let (_, profiles) = all_of(SrtpProfileId::parse, profiles_data)?;

        let (rest, mki_length) = be_u8(rest)?;
        let (rest, mki) = take(mki_length)(rest)?;

        Ok((
            rest,
            UseSrtpExtension {
                profiles,
                mki: mki.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&((self.profiles.len() * 2) as u16).to_be_bytes());
        for profile in &self.profiles {
            output.extend_from_slice(&profile.as_u16().to_be_bytes());
        }
        output.push(self.mki.len() as u8);
        output.extend_from_slice(&self.mki);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_order_on_the_wire() {
        let ext = UseSrtpExtension::new(SrtpProfile::ALL);

        let mut serialized = Buf::new();
        ext.serialize(&mut serialized);

        let expected = [
            0x00, 0x06, // Profiles length (6 bytes)
            0x00, 0x08, // SRTP_AEAD_AES_256_GCM
            0x00, 0x07, // SRTP_AEAD_AES_128_GCM
            0x00, 0x01, // SRTP_AES128_CM_SHA1_80
            0x00, // MKI length
        ];

        assert_eq!(&*serialized, expected);
    }

    #[test]
    fn unknown_profile_is_kept() {
        let bytes = [0, 4, 0, 2, 0, 7, 1, 0xEE];

        let (rest, parsed) = UseSrtpExtension::parse(&bytes).unwrap();

        assert!(rest.is_empty());
        assert_eq!(
            parsed.profiles,
            vec![
                SrtpProfileId::Unknown(2),
                SrtpProfileId::SRTP_AEAD_AES_128_GCM
            ]
        );
        assert_eq!(parsed.mki, vec![0xEE]);
        assert_eq!(parsed.profiles[0].profile(), None);
    }

    #[test]
    fn odd_profile_length() {
        assert!(UseSrtpExtension::parse(&[0, 3, 0, 1, 0, 0]).is_err());
    }
}
