// src/query/packet.rs
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use super::QueryError;

pub const SINGLE_PACKET: i32 = -1;
pub const SPLIT_PACKET: i32 = -2;

pub const S2C_CHALLENGE: u8 = 0x41;
pub const INFO_REPLY: u8 = 0x49;
pub const PLAYER_REPLY: u8 = 0x44;
pub const RULES_REPLY: u8 = 0x45;

const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const NO_CHALLENGE: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const THE_SHIP_APP_ID: u16 = 2400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Info,
    Players,
    Rules,
}

impl Request {
    pub fn header(self) -> u8 {
        match self {
            Self::Info => 0x54,
            Self::Players => 0x55,
            Self::Rules => 0x56,
        }
    }

    pub fn reply_header(self) -> u8 {
        match self {
            Self::Info => INFO_REPLY,
            Self::Players => PLAYER_REPLY,
            Self::Rules => RULES_REPLY,
        }
    }

    pub fn encode(self, challenge: Option<[u8; 4]>) -> Vec<u8> {
        let mut packet: Vec<u8> = vec![0xFF, 0xFF, 0xFF, 0xFF, self.header()];
        match self {
            Self::Info => {
                packet.extend_from_slice(INFO_PAYLOAD);
                if let Some(challenge) = challenge {
                    packet.extend_from_slice(&challenge);
                }
            }
            Self::Players | Self::Rules => {
                packet.extend_from_slice(&challenge.unwrap_or(NO_CHALLENGE));
            }
        }
        packet
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Challenge([u8; 4]),
    Data(Vec<u8>),
}

/// Splits a reassembled message into a challenge or a data reply.
pub fn classify(message: Vec<u8>) -> Result<Reply, QueryError> {
    match message.first() {
        Some(&S2C_CHALLENGE) => {
            if message.len() < 5 {
                return Err(QueryError::Malformed("short challenge reply".to_string()));
            }
            let mut challenge = [0u8; 4];
            challenge.copy_from_slice(&message[1..5]);
            Ok(Reply::Challenge(challenge))
        }
        Some(_) => Ok(Reply::Data(message)),
        None => Err(QueryError::Malformed("empty reply".to_string())),
    }
}

/// Collects datagrams until one whole message is available.
#[derive(Debug, Default)]
pub struct SplitAssembler {
    id: Option<i32>,
    parts: Vec<Option<Vec<u8>>>,
}

impl SplitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the message body (without the -1 header) once complete.
    pub fn accept(&mut self, datagram: &[u8]) -> Result<Option<Vec<u8>>, QueryError> {
        let mut cursor = Cursor::new(datagram);
        let header = cursor.read_i32::<LittleEndian>().map_err(truncated)?;

        match header {
            SINGLE_PACKET => Ok(Some(datagram[4..].to_vec())),
            SPLIT_PACKET => self.accept_fragment(&mut cursor),
            other => Err(QueryError::Malformed(format!("unknown packet header {}", other))),
        }
    }

    fn accept_fragment(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<Option<Vec<u8>>, QueryError> {
        let id = cursor.read_i32::<LittleEndian>().map_err(truncated)?;
        let total = cursor.read_u8().map_err(truncated)? as usize;
        let number = cursor.read_u8().map_err(truncated)? as usize;
        let _size = cursor.read_u16::<LittleEndian>().map_err(truncated)?;

        if (id as u32) & 0x8000_0000 != 0 {
            return Err(QueryError::Malformed("compressed split replies are not supported".to_string()));
        }
        if total == 0 || number >= total {
            return Err(QueryError::Malformed(format!("split fragment {} of {}", number, total)));
        }

        if self.id != Some(id) || self.parts.len() != total {
            self.id = Some(id);
            self.parts = vec![None; total];
        }

        let mut fragment = Vec::new();
        cursor.read_to_end(&mut fragment).map_err(truncated)?;
        self.parts[number] = Some(fragment);

        if self.parts.iter().any(Option::is_none) {
            return Ok(None);
        }

        let joined: Vec<u8> = self.parts.drain(..).flatten().flatten().collect();
        self.id = None;

        let mut inner = Cursor::new(joined.as_slice());
        if inner.read_i32::<LittleEndian>().map_err(truncated)? != SINGLE_PACKET {
            return Err(QueryError::Malformed("reassembled reply has no header".to_string()));
        }
        Ok(Some(joined[4..].to_vec()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReply {
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub version: String,
    pub keywords: String,
}

pub fn parse_info(message: &[u8]) -> Result<InfoReply, QueryError> {
    let mut cursor = Cursor::new(message);
    expect_header(&mut cursor, INFO_REPLY)?;

    let _protocol = cursor.read_u8().map_err(truncated)?;
    let name = read_cstring(&mut cursor)?;
    let map = read_cstring(&mut cursor)?;
    let folder = read_cstring(&mut cursor)?;
    let game = read_cstring(&mut cursor)?;
    let app_id = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    let players = cursor.read_u8().map_err(truncated)?;
    let max_players = cursor.read_u8().map_err(truncated)?;
    let bots = cursor.read_u8().map_err(truncated)?;

    // server type, environment, visibility, VAC
    let mut flags = [0u8; 4];
    cursor.read_exact(&mut flags).map_err(truncated)?;

    if app_id == THE_SHIP_APP_ID {
        let mut ship = [0u8; 3];
        cursor.read_exact(&mut ship).map_err(truncated)?;
    }

    let version = read_cstring(&mut cursor)?;

    let mut keywords = String::new();
    if let Ok(edf) = cursor.read_u8() {
        if edf & 0x80 != 0 {
            cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        }
        if edf & 0x10 != 0 {
            cursor.read_u64::<LittleEndian>().map_err(truncated)?;
        }
        if edf & 0x40 != 0 {
            cursor.read_u16::<LittleEndian>().map_err(truncated)?;
            read_cstring(&mut cursor)?;
        }
        if edf & 0x20 != 0 {
            keywords = read_cstring(&mut cursor)?;
        }
    }

    Ok(InfoReply { name, map, folder, game, app_id, players, max_players, bots, version, keywords })
}

/// Player list reply, reduced to its entry count.
pub fn parse_player_count(message: &[u8]) -> Result<u8, QueryError> {
    let mut cursor = Cursor::new(message);
    expect_header(&mut cursor, PLAYER_REPLY)?;
    cursor.read_u8().map_err(truncated)
}

pub fn parse_rules(message: &[u8]) -> Result<HashMap<String, String>, QueryError> {
    let mut cursor = Cursor::new(message);
    expect_header(&mut cursor, RULES_REPLY)?;
    let count = cursor.read_u16::<LittleEndian>().map_err(truncated)?;

    let mut rules = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        // Some servers cut the table short; keep what arrived.
        if cursor.position() as usize >= message.len() {
            break;
        }
        let name = read_cstring(&mut cursor)?;
        let value = read_cstring(&mut cursor)?;
        rules.insert(name, value);
    }
    Ok(rules)
}

fn expect_header(cursor: &mut Cursor<&[u8]>, expected: u8) -> Result<(), QueryError> {
    let header = cursor.read_u8().map_err(truncated)?;
    if header != expected {
        return Err(QueryError::UnexpectedResponse { expected, received: header });
    }
    Ok(())
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> Result<String, QueryError> {
    let start = cursor.position() as usize;
    let data = *cursor.get_ref();
    let remaining = data.get(start..).unwrap_or_default();
    let end = remaining
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| QueryError::Malformed("unterminated string".to_string()))?;

    cursor.set_position((start + end + 1) as u64);
    Ok(String::from_utf8_lossy(&remaining[..end]).into_owned())
}

fn truncated(e: std::io::Error) -> QueryError {
    QueryError::Malformed(format!("truncated reply: {}", e))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn info_request_layout() {
        let packet = Request::Info.encode(None);
        assert_eq!(&packet[..5], &[0xFF, 0xFF, 0xFF, 0xFF, 0x54]);
        assert_eq!(&packet[5..], b"Source Engine Query\0");

        let packet = Request::Info.encode(Some([1, 2, 3, 4]));
        assert_eq!(&packet[packet.len() - 4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn player_and_rules_requests_carry_challenge() {
        assert_eq!(Request::Players.encode(None), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x55, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(Request::Rules.encode(Some([9, 8, 7, 6])), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x56, 9, 8, 7, 6]);
    }

    #[test]
    fn challenge_reply_is_detected() {
        let reply = classify(vec![S2C_CHALLENGE, 0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(reply, Reply::Challenge([0xDE, 0xAD, 0xBE, 0xEF]));
        assert!(classify(vec![S2C_CHALLENGE, 1]).is_err());
        assert!(classify(Vec::new()).is_err());
    }

    #[test]
    fn parses_info_with_keywords() {
        let message = info_message("Alpha", "gm_construct", "Sandbox", 24, Some("loc:gb gm:sandbox"));
        let info = parse_info(&message).unwrap();
        assert_eq!(info.name, "Alpha");
        assert_eq!(info.map, "gm_construct");
        assert_eq!(info.game, "Sandbox");
        assert_eq!(info.max_players, 24);
        assert_eq!(info.keywords, "loc:gb gm:sandbox");
    }

    #[test]
    fn info_without_keyword_block_has_empty_keywords() {
        let message = info_message("Beta", "de_dust2", "Sandbox", 8, None);
        assert_eq!(parse_info(&message).unwrap().keywords, "");
    }

    #[test]
    fn info_ending_after_version_has_empty_keywords() {
        let mut message = info_message("Beta", "de_dust2", "Sandbox", 8, None);
        // drop the extra data flag and port
        message.truncate(message.len() - 3);
        assert_eq!(*message.last().unwrap(), 0);

        let info = parse_info(&message).unwrap();
        assert_eq!(info.version, "2023.06.28");
        assert_eq!(info.keywords, "");
    }

    #[test]
    fn wrong_header_is_rejected() {
        let err = parse_info(&players_message(1)).unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedResponse { expected: INFO_REPLY, received: PLAYER_REPLY }));
    }

    #[test]
    fn truncated_info_is_malformed() {
        let message = info_message("Alpha", "gm_construct", "Sandbox", 24, None);
        let err = parse_info(&message[..10]).unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn player_count_comes_from_header() {
        assert_eq!(parse_player_count(&players_message(5)).unwrap(), 5);
        assert_eq!(parse_player_count(&players_message(0)).unwrap(), 0);
    }

    #[test]
    fn parses_rules_table() {
        let message = rules_message(&[("sv_cheats", "0"), ("vistrace_version", "0.14.2")]);
        let rules = parse_rules(&message).unwrap();
        assert_eq!(rules.get("vistrace_version").map(String::as_str), Some("0.14.2"));
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn short_rules_table_keeps_received_pairs() {
        let mut message = rules_message(&[("a", "1")]);
        message[1] = 3;
        let rules = parse_rules(&message).unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn reassembles_split_reply_out_of_order() {
        let whole = single(&rules_message(&[("vistrace_version", "0.14.2"), ("sv_lan", "0")]));
        let (first, second) = whole.split_at(whole.len() / 2);

        let mut assembler = SplitAssembler::new();
        assert_eq!(assembler.accept(&split(77, 2, 1, second)).unwrap(), None);
        let message = assembler.accept(&split(77, 2, 0, first)).unwrap().unwrap();

        let rules = parse_rules(&message).unwrap();
        assert_eq!(rules.get("sv_lan").map(String::as_str), Some("0"));
    }

    #[test]
    fn compressed_split_is_rejected() {
        let mut assembler = SplitAssembler::new();
        let err = assembler.accept(&split(i32::MIN | 5, 2, 0, &[1, 2])).unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn single_packet_passes_through() {
        let mut assembler = SplitAssembler::new();
        let message = assembler.accept(&single(&players_message(2))).unwrap().unwrap();
        assert_eq!(parse_player_count(&message).unwrap(), 2);
    }
}
