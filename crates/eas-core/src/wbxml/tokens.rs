//! WBXML global tokens and header constants.

/// Selects the code page for subsequent tag tokens.
pub const SWITCH_PAGE: u8 = 0x00;
/// Closes the current element.
pub const END: u8 = 0x01;
pub const ENTITY: u8 = 0x02;
/// Inline null-terminated string.
pub const STR_I: u8 = 0x03;
pub const LITERAL: u8 = 0x04;
pub const EXT_I_0: u8 = 0x40;
pub const EXT_I_1: u8 = 0x41;
pub const EXT_I_2: u8 = 0x42;
pub const PI: u8 = 0x43;
pub const LITERAL_C: u8 = 0x44;
pub const EXT_T_0: u8 = 0x80;
pub const EXT_T_1: u8 = 0x81;
pub const EXT_T_2: u8 = 0x82;
pub const STR_T: u8 = 0x83;
pub const LITERAL_A: u8 = 0x84;
pub const EXT_0: u8 = 0xC0;
pub const EXT_1: u8 = 0xC1;
pub const EXT_2: u8 = 0xC2;
/// Length-prefixed binary data.
pub const OPAQUE: u8 = 0xC3;
pub const LITERAL_AC: u8 = 0xC4;

/// Tag token flag: attributes follow.
pub const TAG_ATTRIBUTES: u8 = 0x80;
/// Tag token flag: element has content and is closed by END.
pub const TAG_CONTENT: u8 = 0x40;
/// Tag token id mask.
pub const TAG_ID_MASK: u8 = 0x3F;

/// WBXML 1.0 through 1.3.
pub const SUPPORTED_VERSIONS: [u8; 4] = [0x00, 0x01, 0x02, 0x03];
/// Version written by the encoder (WBXML 1.3).
pub const VERSION_1_3: u8 = 0x03;
/// "Unknown or missing" public identifier, used by ActiveSync.
pub const PUBLIC_ID_UNKNOWN: u32 = 0x01;
/// IANA MIBenum for UTF-8.
pub const CHARSET_UTF8: u32 = 106;

/// Global tokens this profile never emits and refuses to decode.
pub fn is_unsupported(byte: u8) -> bool {
    matches!(
        byte,
        ENTITY
            | LITERAL
            | EXT_I_0
            | EXT_I_1
            | EXT_I_2
            | PI
            | LITERAL_C
            | EXT_T_0
            | EXT_T_1
            | EXT_T_2
            | STR_T
            | LITERAL_A
            | EXT_0
            | EXT_1
            | EXT_2
            | LITERAL_AC
    )
}
