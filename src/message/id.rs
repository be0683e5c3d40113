use std::fmt;
use std::ops::Deref;

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::buffer::Buf;

macro_rules! var_array {
    ($name:ident, $min:expr, $max:expr) => {
        #[derive(Clone, Copy)]
        pub struct $name([u8; $max], usize);

        impl $name {
            pub fn try_new(data: &[u8]) -> Option<Self> {
                #[allow(unused_comparisons)]
                if data.len() < $min || data.len() > $max {
                    return None;
                }
                let mut array = [0; $max];
                array[..data.len()].copy_from_slice(data);
                Some($name(array, data.len()))
            }

            pub fn empty() -> Self {
                $name([0; $max], 0)
            }

            pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
                let (rest, len) = be_u8(input)?;
                let (rest, data) = take(len as usize)(rest)?;
                match Self::try_new(data) {
                    Some(v) => Ok((rest, v)),
                    None => Err(Err::Failure(Error::new(input, ErrorKind::LengthValue))),
                }
            }

            pub fn serialize(&self, output: &mut Buf) {
                output.push(self.1 as u8);
                output.extend_from_slice(self);
            }
        }

        impl Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &Self::Target {
                &self.0[..self.1]
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                **self == **other
            }
        }

        impl Eq for $name {}

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for b in self.iter() {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, ")")
            }
        }
    };
}

var_array!(SessionId, 0, 32);
var_array!(Cookie, 0, 255);
