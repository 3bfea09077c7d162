/*!
Codec for the fixed-format binary telemetry frames emitted by the
acquisition frontend.

Every data message on the wire is a length-prefixed blob: a 4-byte
little-endian size `N` followed by `N` payload bytes. The payload opens with
a 12-byte header (start sentinel, APID, sequence, run id, data size, CRC);
the byte right after the header names the packet type and the next one its
subtype. The codec is a set of pure functions over byte slices and is
bit-exact; nothing here allocates except the encoders.
*/

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// First byte of every frame payload.
pub const START_BYTE: u8 = 0x8D;

/// APID class bit: clear for telecommands, set for telemetry.
pub const CLASS_TC: u8 = 0x00;
pub const CLASS_TM: u8 = 0x80;
pub const CLASS_MASK: u8 = 0x80;
pub const SOURCE_MASK: u8 = 0x7F;

/// Sequence field grouping tags (upper two bits).
pub const GROUP_STAND_ALONE: u16 = 0xC000;
pub const GROUP_MASK: u16 = 0xC000;
pub const SEQ_COUNT_MASK: u16 = 0x3FFF;

/// Length of the 4-byte size prefix in front of every payload.
pub const SIZE_PREFIX_LEN: usize = 4;
/// Length of the fixed frame header.
pub const HEADER_LEN: usize = 12;
/// Length of the waveform acquisition sub-header.
pub const WAVE_HEADER_LEN: usize = 44;
/// Packed 32-bit words per waveform packet; each holds two 16-bit samples.
pub const WAVE_WORDS: usize = 1020;
/// 16-bit samples per waveform packet.
pub const WAVE_SAMPLES: usize = 2 * WAVE_WORDS;

/// Waveform data body: type/subtype/two spares, then the packed words.
pub const WAVE_DATA_LEN: usize = 4 + 4 * WAVE_WORDS;
/// Payload length of a complete waveform frame.
pub const WAVE_FRAME_LEN: usize = HEADER_LEN + WAVE_HEADER_LEN + WAVE_DATA_LEN;

pub const TYPE_WAVE: u8 = 0xA1;
pub const SUBTYPE_WAVE_HEADER: u8 = 0x01;
pub const SUBTYPE_WAVE_DATA: u8 = 0x02;
pub const TYPE_HOUSEKEEPING: u8 = 0x03;
pub const SUBTYPE_HOUSEKEEPING: u8 = 0x01;
pub const TYPE_CONTROL: u8 = 0xA0;
pub const SUBTYPE_DEFAULT_A0: u8 = 0x99;
pub const SUBTYPE_START_ACQ: u8 = 0x04;
pub const SUBTYPE_STOP_ACQ: u8 = 0x05;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Fewer bytes than the size prefix itself.
    #[error("packet too short: {len} bytes")]
    ShortPacket { len: usize },
    /// The size prefix is non-positive or disagrees with the actual length.
    #[error("invalid size prefix {declared} for {actual} payload bytes")]
    InvalidSize { declared: i32, actual: usize },
    /// The payload ends before the field being decoded.
    #[error("truncated payload: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
}

/// The 12-byte frame header.
///
/// `size` counts the body bytes after the header; `crc` covers exactly those
/// bytes (see [`crc32`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub apid: u8,
    pub sequence: u16,
    pub run_id: u16,
    pub size: u16,
    pub crc: u32,
}

impl FrameHeader {
    pub fn decode(bytes: &[u8]) -> Result<FrameHeader, PacketError> {
        if bytes.len() < HEADER_LEN {
            return Err(PacketError::Truncated {
                need: HEADER_LEN,
                have: bytes.len(),
            });
        }
        Ok(FrameHeader {
            apid: bytes[1],
            sequence: LittleEndian::read_u16(&bytes[2..4]),
            run_id: LittleEndian::read_u16(&bytes[4..6]),
            size: LittleEndian::read_u16(&bytes[6..8]),
            crc: LittleEndian::read_u32(&bytes[8..12]),
        })
    }

    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = START_BYTE;
        buf[1] = self.apid;
        LittleEndian::write_u16(&mut buf[2..4], self.sequence);
        LittleEndian::write_u16(&mut buf[4..6], self.run_id);
        LittleEndian::write_u16(&mut buf[6..8], self.size);
        LittleEndian::write_u32(&mut buf[8..12], self.crc);
    }

    pub fn is_telecommand(&self) -> bool {
        self.apid & CLASS_MASK == CLASS_TC
    }
}

/// Outbound control frames the pipeline can address to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// The "undefined" 0xA0 frame that arms the frontend trigger.
    DefaultA0,
    StartAcq,
    StopAcq,
}

impl ControlKind {
    pub fn subtype(self) -> u8 {
        match self {
            ControlKind::DefaultA0 => SUBTYPE_DEFAULT_A0,
            ControlKind::StartAcq => SUBTYPE_START_ACQ,
            ControlKind::StopAcq => SUBTYPE_STOP_ACQ,
        }
    }
}

/// What a frame payload turned out to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Waveform,
    WaveformHeader,
    Housekeeping,
    Control(ControlKind),
    Unknown(u8, u8),
}

/// Split a length-prefixed message into its payload.
///
/// The prefix must be positive and must equal the number of bytes that
/// follow it; anything else is a malformed message and is rejected rather
/// than guessed at.
pub fn parse_envelope(bytes: &[u8]) -> Result<&[u8], PacketError> {
    // A bare size prefix with no payload behind it is short, not invalid.
    if bytes.len() <= SIZE_PREFIX_LEN {
        return Err(PacketError::ShortPacket { len: bytes.len() });
    }
    let declared = LittleEndian::read_i32(&bytes[..SIZE_PREFIX_LEN]);
    let actual = bytes.len() - SIZE_PREFIX_LEN;
    if declared <= 0 || declared as usize != actual {
        return Err(PacketError::InvalidSize { declared, actual });
    }
    Ok(&bytes[SIZE_PREFIX_LEN..])
}

/// Prepend the 4-byte size prefix to a payload.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SIZE_PREFIX_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Read the type/subtype pair just past the header and classify the payload.
pub fn classify(payload: &[u8]) -> Result<PacketKind, PacketError> {
    if payload.len() < HEADER_LEN + 2 {
        return Err(PacketError::Truncated {
            need: HEADER_LEN + 2,
            have: payload.len(),
        });
    }
    let ptype = payload[HEADER_LEN];
    let subtype = payload[HEADER_LEN + 1];
    Ok(match (ptype, subtype) {
        (TYPE_WAVE, SUBTYPE_WAVE_HEADER) => PacketKind::WaveformHeader,
        (TYPE_WAVE, _) => PacketKind::Waveform,
        (TYPE_HOUSEKEEPING, SUBTYPE_HOUSEKEEPING) => PacketKind::Housekeeping,
        (TYPE_CONTROL, SUBTYPE_DEFAULT_A0) => PacketKind::Control(ControlKind::DefaultA0),
        (TYPE_CONTROL, SUBTYPE_START_ACQ) => PacketKind::Control(ControlKind::StartAcq),
        (TYPE_CONTROL, SUBTYPE_STOP_ACQ) => PacketKind::Control(ControlKind::StopAcq),
        (t, s) => PacketKind::Unknown(t, s),
    })
}

/// Build a control frame payload: header plus a two-byte type/subtype body.
///
/// The sequence field carries the stand-alone group tag and the caller's
/// counter (masked to 14 bits); the CRC covers the body bytes.
pub fn encode_control(kind: ControlKind, run_id: u16, count: u16) -> Vec<u8> {
    let body = [TYPE_CONTROL, kind.subtype()];
    let header = FrameHeader {
        apid: CLASS_TC | 0x01,
        sequence: GROUP_STAND_ALONE | (count & SEQ_COUNT_MASK),
        run_id,
        size: body.len() as u16,
        crc: crc32(&body),
    };
    let mut out = vec![0u8; HEADER_LEN + body.len()];
    header.encode_into(&mut out[..HEADER_LEN]);
    out[HEADER_LEN..].copy_from_slice(&body);
    out
}

/// The waveform acquisition sub-header that follows the frame header.
///
/// Only the fields the pipeline actually consumes are surfaced; the raw
/// time-tagging bytes stay in the slice for anyone who needs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveHeader {
    pub session_id: u16,
    pub config_id: u16,
    /// Microseconds field of the time tag. The frontend also abuses this to
    /// carry the reference pulse area during commissioning runs.
    pub us: u32,
    pub ts_sec: i32,
    pub ts_nsec: i32,
    pub decimation: u32,
    pub curr_off: u32,
    pub trig_off: u32,
    pub size: u32,
}

impl WaveHeader {
    pub fn decode(bytes: &[u8]) -> Result<WaveHeader, PacketError> {
        if bytes.len() < WAVE_HEADER_LEN {
            return Err(PacketError::Truncated {
                need: WAVE_HEADER_LEN,
                have: bytes.len(),
            });
        }
        Ok(WaveHeader {
            session_id: LittleEndian::read_u16(&bytes[4..6]),
            config_id: LittleEndian::read_u16(&bytes[6..8]),
            us: LittleEndian::read_u32(&bytes[16..20]),
            ts_sec: LittleEndian::read_i32(&bytes[20..24]),
            ts_nsec: LittleEndian::read_i32(&bytes[24..28]),
            decimation: LittleEndian::read_u32(&bytes[28..32]),
            curr_off: LittleEndian::read_u32(&bytes[32..36]),
            trig_off: LittleEndian::read_u32(&bytes[36..40]),
            size: LittleEndian::read_u32(&bytes[40..44]),
        })
    }
}

/// Unpack the waveform sample words into 16-bit samples.
///
/// Each 32-bit word packs two samples, high half first.
pub fn unpack_samples(words: &[u8]) -> Vec<u16> {
    let mut samples = Vec::with_capacity(words.len() / 2);
    for chunk in words.chunks_exact(4) {
        let word = LittleEndian::read_u32(chunk);
        samples.push((word >> 16) as u16);
        samples.push((word & 0xFFFF) as u16);
    }
    samples
}

/// Table-driven CRC-32 over the body bytes.
///
/// Initial value `0xFFFF_FFFF`, no post-inversion. The table is the one the
/// frontend burns into its firmware; both ends must match bit for bit.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in bytes {
        crc = (crc << 8) ^ CRC32_TABLE[(((crc >> 24) as u8) ^ b) as usize];
    }
    crc
}

#[rustfmt::skip]
const CRC32_TABLE: [u32; 256] = [
    0x00000000, 0x05D7B3A1, 0x0BAF6742, 0x0E78D4E3,
    0x175ECE84, 0x12897D25, 0x1CF1A9C6, 0x19261A67,
    0x2EBD9D08, 0x2B6A2EA9, 0x2512FA4A, 0x20C549EB,
    0x39E3538C, 0x3C34E02D, 0x324C34CE, 0x379B876F,
    0x5D7B3A10, 0x58AC89B1, 0x56D45D52, 0x5303EEF3,
    0x4A25F494, 0x4FF24735, 0x418A93D6, 0x445D2077,
    0x73C6A718, 0x761114B9, 0x7869C05A, 0x7DBE73FB,
    0x6498699C, 0x614FDA3D, 0x6F370EDE, 0x6AE0BD7F,
    0xBAF67420, 0xBF21C781, 0xB1591362, 0xB48EA0C3,
    0xADA8BAA4, 0xA87F0905, 0xA607DDE6, 0xA3D06E47,
    0x944BE928, 0x919C5A89, 0x9FE48E6A, 0x9A333DCB,
    0x831527AC, 0x86C2940D, 0x88BA40EE, 0x8D6DF34F,
    0xE78D4E30, 0xE25AFD91, 0xEC222972, 0xE9F59AD3,
    0xF0D380B4, 0xF5043315, 0xFB7CE7F6, 0xFEAB5457,
    0xC930D338, 0xCCE76099, 0xC29FB47A, 0xC74807DB,
    0xDE6E1DBC, 0xDBB9AE1D, 0xD5C17AFE, 0xD016C95F,
    0x703B5BE1, 0x75ECE840, 0x7B943CA3, 0x7E438F02,
    0x67659565, 0x62B226C4, 0x6CCAF227, 0x691D4186,
    0x5E86C6E9, 0x5B517548, 0x5529A1AB, 0x50FE120A,
    0x49D8086D, 0x4C0FBBCC, 0x42776F2F, 0x47A0DC8E,
    0x2D4061F1, 0x2897D250, 0x26EF06B3, 0x2338B512,
    0x3A1EAF75, 0x3FC91CD4, 0x31B1C837, 0x34667B96,
    0x03FDFCF9, 0x062A4F58, 0x08529BBB, 0x0D85281A,
    0x14A3327D, 0x117481DC, 0x1F0C553F, 0x1ADBE69E,
    0xCACD2FC1, 0xCF1A9C60, 0xC1624883, 0xC4B5FB22,
    0xDD93E145, 0xD84452E4, 0xD63C8607, 0xD3EB35A6,
    0xE470B2C9, 0xE1A70168, 0xEFDFD58B, 0xEA08662A,
    0xF32E7C4D, 0xF6F9CFEC, 0xF8811B0F, 0xFD56A8AE,
    0x97B615D1, 0x9261A670, 0x9C197293, 0x99CEC132,
    0x80E8DB55, 0x853F68F4, 0x8B47BC17, 0x8E900FB6,
    0xB90B88D9, 0xBCDC3B78, 0xB2A4EF9B, 0xB7735C3A,
    0xAE55465D, 0xAB82F5FC, 0xA5FA211F, 0xA02D92BE,
    0xE076B7C2, 0xE5A10463, 0xEBD9D080, 0xEE0E6321,
    0xF7287946, 0xF2FFCAE7, 0xFC871E04, 0xF950ADA5,
    0xCECB2ACA, 0xCB1C996B, 0xC5644D88, 0xC0B3FE29,
    0xD995E44E, 0xDC4257EF, 0xD23A830C, 0xD7ED30AD,
    0xBD0D8DD2, 0xB8DA3E73, 0xB6A2EA90, 0xB3755931,
    0xAA534356, 0xAF84F0F7, 0xA1FC2414, 0xA42B97B5,
    0x93B010DA, 0x9667A37B, 0x981F7798, 0x9DC8C439,
    0x84EEDE5E, 0x81396DFF, 0x8F41B91C, 0x8A960ABD,
    0x5A80C3E2, 0x5F577043, 0x512FA4A0, 0x54F81701,
    0x4DDE0D66, 0x4809BEC7, 0x46716A24, 0x43A6D985,
    0x743D5EEA, 0x71EAED4B, 0x7F9239A8, 0x7A458A09,
    0x6363906E, 0x66B423CF, 0x68CCF72C, 0x6D1B448D,
    0x07FBF9F2, 0x022C4A53, 0x0C549EB0, 0x09832D11,
    0x10A53776, 0x157284D7, 0x1B0A5034, 0x1EDDE395,
    0x294664FA, 0x2C91D75B, 0x22E903B8, 0x273EB019,
    0x3E18AA7E, 0x3BCF19DF, 0x35B7CD3C, 0x30607E9D,
    0x904DEC23, 0x959A5F82, 0x9BE28B61, 0x9E3538C0,
    0x871322A7, 0x82C49106, 0x8CBC45E5, 0x896BF644,
    0xBEF0712B, 0xBB27C28A, 0xB55F1669, 0xB088A5C8,
    0xA9AEBFAF, 0xAC790C0E, 0xA201D8ED, 0xA7D66B4C,
    0xCD36D633, 0xC8E16592, 0xC699B171, 0xC34E02D0,
    0xDA6818B7, 0xDFBFAB16, 0xD1C77FF5, 0xD410CC54,
    0xE38B4B3B, 0xE65CF89A, 0xE8242C79, 0xEDF39FD8,
    0xF4D585BF, 0xF102361E, 0xFF7AE2FD, 0xFAAD515C,
    0x2ABB9803, 0x2F6C2BA2, 0x2114FF41, 0x24C34CE0,
    0x3DE55687, 0x3832E526, 0x364A31C5, 0x339D8264,
    0x0406050B, 0x01D1B6AA, 0x0FA96249, 0x0A7ED1E8,
    0x1358CB8F, 0x168F782E, 0x18F7ACCD, 0x1D201F6C,
    0x77C0A213, 0x721711B2, 0x7C6FC551, 0x79B876F0,
    0x609E6C97, 0x6549DF36, 0x6B310BD5, 0x6EE6B874,
    0x597D3F1B, 0x5CAA8CBA, 0x52D25859, 0x5705EBF8,
    0x4E23F19F, 0x4BF4423E, 0x458C96DD, 0x405B257C,
];
