use encoding_rs::Encoding;
use serde::Deserialize;

/// Text encodings understood by line and character reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Charset {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "shift-jis", alias = "sjis", alias = "cp932")]
    ShiftJis,
    #[serde(rename = "gbk", alias = "gb2312")]
    Gbk,
    #[serde(rename = "big5")]
    Big5,
    #[serde(rename = "euc-kr", alias = "hangeul")]
    EucKr,
    #[serde(rename = "windows-1252")]
    Windows1252,
    #[serde(rename = "iso-8859-15")]
    Iso8859_15,
}

impl Charset {
    /// Map a legacy `DX_CHARSET_*` code. `DEFAULT` (0) means UTF-8.
    pub fn from_legacy_code(code: i32) -> Option<Self> {
        match code {
            0 | 7 => Some(Self::Utf8),
            1 => Some(Self::ShiftJis),
            2 => Some(Self::EucKr),
            3 => Some(Self::Big5),
            4 => Some(Self::Gbk),
            5 => Some(Self::Windows1252),
            6 => Some(Self::Iso8859_15),
            _ => None,
        }
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            Self::Utf8 => encoding_rs::UTF_8,
            Self::ShiftJis => encoding_rs::SHIFT_JIS,
            Self::Gbk => encoding_rs::GBK,
            Self::Big5 => encoding_rs::BIG5,
            Self::EucKr => encoding_rs::EUC_KR,
            Self::Windows1252 => encoding_rs::WINDOWS_1252,
            Self::Iso8859_15 => encoding_rs::ISO_8859_15,
        }
    }

    /// Encoded width of the character starting with `lead`
    pub fn sequence_len(self, lead: u8) -> usize {
        match self {
            Self::Utf8 => match lead {
                0xC2..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF4 => 4,
                _ => 1,
            },
            Self::ShiftJis => match lead {
                0x81..=0x9F | 0xE0..=0xFC => 2,
                _ => 1,
            },
            Self::Gbk | Self::Big5 | Self::EucKr => match lead {
                0x81..=0xFE => 2,
                _ => 1,
            },
            Self::Windows1252 | Self::Iso8859_15 => 1,
        }
    }

    /// Decode a whole buffer, replacing malformed sequences with U+FFFD
    pub fn decode(self, bytes: &[u8]) -> String {
        self.encoding()
            .decode_without_bom_handling(bytes)
            .0
            .into_owned()
    }

    /// Decode exactly one character, or `None` if `bytes` is not one
    /// well-formed character
    pub fn decode_char(self, bytes: &[u8]) -> Option<char> {
        let text = self
            .encoding()
            .decode_without_bom_handling_and_without_replacement(bytes)?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}
