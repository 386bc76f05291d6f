//! Validated input types.
//!
//! Each type has a private representation and a single total `parse`
//! constructor, so a value of the type is proof that validation happened
//! before any request was made.

use crate::error::{OtpError, PasswordError, UnknownMfaKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The ways a second factor can be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MfaKind {
    /// Time-based codes from an authenticator app.
    Totp,
    /// One-time passcodes delivered over SMS.
    Sms,
    /// One-time passcodes delivered over email.
    Email,
}

impl MfaKind {
    /// Case-insensitive parse of the kind name.
    pub fn parse(raw: &str) -> Result<Self, UnknownMfaKind> {
        if raw.eq_ignore_ascii_case("totp") {
            Ok(MfaKind::Totp)
        } else if raw.eq_ignore_ascii_case("sms") {
            Ok(MfaKind::Sms)
        } else if raw.eq_ignore_ascii_case("email") {
            Ok(MfaKind::Email)
        } else {
            Err(UnknownMfaKind(raw.to_owned()))
        }
    }

    /// The canonical wire name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            MfaKind::Totp => "Totp",
            MfaKind::Sms => "Sms",
            MfaKind::Email => "Email",
        }
    }
}

impl fmt::Display for MfaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MfaKind {
    type Err = UnknownMfaKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        MfaKind::parse(raw)
    }
}

/// A password that satisfies the provider's composition policy: 8 to 72
/// characters, at least one uppercase letter, one lowercase letter, one
/// digit and one special character, with nothing outside those classes.
///
/// `Debug` is redacted; use [`Password::expose`] at the point the raw string
/// is actually needed.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 72;

fn is_special(c: char) -> bool {
    matches!(u32::from(c), 0x21..=0x2F | 0x3A..=0x40 | 0x7B..=0x7E)
}

impl Password {
    /// Validate `raw` in a single pass over its characters.
    ///
    /// When several predicates fail at once, the reported error follows a
    /// fixed priority: length, illegal character, missing uppercase, missing
    /// lowercase, missing digit, missing special.
    pub fn parse(raw: impl Into<String>) -> Result<Self, PasswordError> {
        let raw = raw.into();
        let len = raw.chars().count();
        if len < PASSWORD_MIN {
            return Err(PasswordError::TooFewChars { len });
        }
        if len > PASSWORD_MAX {
            return Err(PasswordError::TooManyChars { len });
        }

        let mut upper = false;
        let mut lower = false;
        let mut digit = false;
        let mut special = false;
        let mut legal = true;
        for c in raw.chars() {
            let is_upper = c.is_ascii_uppercase();
            let is_lower = c.is_ascii_lowercase();
            let is_digit = c.is_ascii_digit();
            let is_spec = is_special(c);
            upper |= is_upper;
            lower |= is_lower;
            digit |= is_digit;
            special |= is_spec;
            legal &= is_upper | is_lower | is_digit | is_spec;
        }

        if !legal {
            Err(PasswordError::IllegalCharacter)
        } else if !upper {
            Err(PasswordError::MissingUppercase)
        } else if !lower {
            Err(PasswordError::MissingLowercase)
        } else if !digit {
            Err(PasswordError::MissingDigit)
        } else if !special {
            Err(PasswordError::MissingSpecial)
        } else {
            Ok(Password(raw))
        }
    }

    /// The validated raw password.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(..)")
    }
}

/// True iff every byte of `raw` is a decimal digit. Accumulated with `&` so
/// the scan cost depends only on the length.
fn all_digits(raw: &str) -> bool {
    let mut numeric = true;
    for b in raw.bytes() {
        numeric &= b.wrapping_sub(b'0') <= 9;
    }
    numeric
}

/// A six-digit one-time passcode, as delivered over SMS or email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleOtp(String);

impl SimpleOtp {
    /// Digits a simple OTP consists of.
    pub const DIGITS: usize = 6;

    /// Validate length and digit content.
    pub fn parse(raw: impl Into<String>) -> Result<Self, OtpError> {
        let raw = raw.into();
        if raw.len() != Self::DIGITS {
            return Err(OtpError::InvalidLength {
                expected: Self::DIGITS,
                received: raw.len(),
            });
        }
        if !all_digits(&raw) {
            return Err(OtpError::NonNumeric);
        }
        Ok(SimpleOtp(raw))
    }

    /// The validated passcode.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An eight-digit code produced by an authenticator app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totp(String);

impl Totp {
    /// Digits a TOTP code consists of.
    pub const DIGITS: usize = 8;

    /// Validate length and digit content.
    pub fn parse(raw: impl Into<String>) -> Result<Self, OtpError> {
        let raw = raw.into();
        if raw.len() != Self::DIGITS {
            return Err(OtpError::InvalidLength {
                expected: Self::DIGITS,
                received: raw.len(),
            });
        }
        if !all_digits(&raw) {
            return Err(OtpError::NonNumeric);
        }
        Ok(Totp(raw))
    }

    /// The validated code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
