use crate::resource::Resource;
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// DNS message that serves as the root of every query and response the
/// responder reads or writes.
///
/// # Examples
///
/// For constructing a probe-style query and encoding it:
///
/// ```rust
/// use castdns::types::*;
///
/// let mut m = Message::default();
/// m.add_question("_http._tcp.local", Type::PTR, Class::Internet);
///
/// // Encode the query as a Vec<u8>, ready for the multicast group.
/// let packet = m.to_vec().expect("failed to encode query");
/// assert!(packet.len() > 12);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// 16-bit identifier assigned by the program that generates any kind of
    /// query. Multicast DNS responses carry zero here, see [rfc6762]
    /// section 18.1.
    ///
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    pub id: u16,

    /// Specifies whether this message is a query (0), or a response (1).
    pub qr: QR,

    /// Specifies kind of query in this message. 0 represents a standard
    /// query. Multicast DNS silently ignores everything else.
    pub opcode: Opcode,

    /// Authoritative Answer - every multicast DNS response is authoritative
    /// for the records it carries.
    pub aa: bool,

    /// Truncation - specifies that this message was truncated.
    pub tc: bool,

    /// Recursion Desired. Always unset in multicast DNS.
    pub rd: bool,

    /// Recursion Available. Always unset in multicast DNS.
    pub ra: bool,

    /// Z Reserved for future use. You must set this field to 0.
    pub z: bool,

    /// Authentic Data. Ignored by multicast DNS.
    pub ad: bool,

    /// Checking Disabled. Ignored by multicast DNS.
    pub cd: bool,

    /// Response code.
    pub rcode: Rcode,

    /// The questions.
    pub questions: Vec<Question>,

    /// The answer records.
    pub answers: Vec<Record>,

    /// The authoritive records. During probing these carry the records the
    /// sender proposes to become authoritative for.
    pub authoritys: Vec<Record>,

    /// The additional records.
    pub additionals: Vec<Record>,
}

/// Defaults to an empty multicast DNS query.
impl Default for Message {
    fn default() -> Self {
        Message {
            id: Message::random_id(),
            qr: QR::Query,
            opcode: Opcode::Query,
            aa: false,
            tc: false,
            rd: false,
            ra: false,
            z: false,
            ad: false,
            cd: false,
            rcode: Rcode::NoError,

            questions: Vec::default(),
            answers: Vec::default(),
            authoritys: Vec::default(),
            additionals: Vec::default(),
        }
    }
}

impl Message {
    /// Returns a random u16 suitable for the [`Message`] id field.
    pub fn random_id() -> u16 {
        use rand::Rng;
        rand::thread_rng().gen()
    }

    /// Returns an empty multicast DNS response (QR=1, AA=1, id zero).
    pub fn response() -> Message {
        Message {
            id: 0,
            qr: QR::Response,
            aa: true,
            ..Default::default()
        }
    }

    /// Returns a query carrying a single question.
    pub fn query(name: &str, r#type: Type) -> Message {
        let mut m = Message::default();
        m.add_question(name, r#type, Class::Internet);
        m
    }

    /// Adds a question to the message.
    pub fn add_question(&mut self, name: &str, r#type: Type, class: Class) {
        self.questions.push(Question {
            name: name.to_string(),
            r#type,
            class,
            unicast_response: false,
        });
    }

    /// True when this message is a query (QR=0).
    pub fn is_query(&self) -> bool {
        self.qr == QR::Query
    }

    /// True when this message is a response (QR=1).
    pub fn is_response(&self) -> bool {
        self.qr == QR::Response
    }
}

/// Question struct containing a name, question [`Type`] and question
/// [`Class`], plus the [rfc6762] unicast-response bit.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
#[derive(Clone, Debug, PartialEq)]
pub struct Question {
    /// The name in question.
    pub name: String,

    /// The question's type.
    ///
    /// All Type's are valid, including the pseudo types (e.g [`Type::ANY`]).
    pub r#type: Type,

    /// The question's class.
    pub class: Class,

    /// The QU bit (top bit of the wire class field): the querier is willing
    /// to accept a unicast reply. See [rfc6762] section 5.4.
    ///
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    pub unicast_response: bool,
}

/// Resource Record (RR) carried in the answer, authority or additional
/// section of a message.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// The record's name.
    pub name: String,

    /// The resource's class.
    pub class: Class,

    /// The cache-flush bit (top bit of the wire class field): this is the
    /// authoritative current value, drop older cached copies. Set on unique
    /// records, never on shared ones. See [rfc6762] section 10.2.
    ///
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    pub cache_flush: bool,

    /// The number of seconds that the resource record may be cached. Zero
    /// announces that the record is being withdrawn (a goodbye).
    pub ttl: Duration,

    /// The actual resource.
    pub resource: Resource,
}

impl Record {
    pub fn r#type(&self) -> Type {
        self.resource.r#type()
    }
}

/// Query or Response bit.
#[derive(Copy, Clone, Debug, EnumString, PartialEq)]
pub enum QR {
    Query = 0,
    Response = 1,
}

/// Defaults to [`QR::Query`].
impl Default for QR {
    fn default() -> Self {
        QR::Query
    }
}

impl QR {
    pub fn from_bool(b: bool) -> QR {
        match b {
            false => QR::Query,
            true => QR::Response,
        }
    }

    pub fn to_bool(self) -> bool {
        match self {
            QR::Query => false,
            QR::Response => true,
        }
    }
}

/// Specifies kind of query in this message. See [rfc1035] and [rfc6895].
/// Multicast DNS only ever generates [`Opcode::Query`]; the rest parse so
/// that foreign unicast DNS traffic on port 5353 can be recognised and
/// dropped.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [rfc6895]: https://datatracker.ietf.org/doc/html/rfc6895
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)] // Really only 4 bits
pub enum Opcode {
    /// Query.
    Query = 0,

    /// Inverse Query (OBSOLETE). See [rfc3425].
    ///
    /// [rfc3425]: https://datatracker.ietf.org/doc/html/rfc3425
    IQuery = 1,
    Status = 2,

    /// See [rfc1996]
    ///
    /// [rfc1996]: https://datatracker.ietf.org/doc/html/rfc1996
    Notify = 4,

    /// See [rfc2136]
    ///
    /// [rfc2136]: https://datatracker.ietf.org/doc/html/rfc2136
    Update = 5,
    // 3 and 6-15 Remain unassigned.
}

/// Defaults to [`Opcode::Query`].
impl Default for Opcode {
    fn default() -> Self {
        Opcode::Query
    }
}

/// Response Codes. See [rfc1035]. Multicast DNS responses always carry
/// [`Rcode::NoError`]; anything else on the wire marks the message as
/// foreign and it is ignored.
///
/// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
#[derive(Copy, Clone, Debug, Display, EnumString, FromPrimitive, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)] // Only 4 bits in the header
pub enum Rcode {
    /// No Error
    NoError = 0,

    /// Format Error
    FormErr = 1,

    /// Server Failure
    ServFail = 2,

    /// Non-Existent Domain
    NXDomain = 3,

    /// Not Implemented
    NotImp = 4,

    /// Query Refused
    Refused = 5,
    // 6-15 not used by multicast DNS.
}

/// Defaults to [`Rcode::NoError`].
impl Default for Rcode {
    fn default() -> Self {
        Rcode::NoError
    }
}

/// Resource Record Type. The four record types of DNS-Based Service
/// Discovery ([rfc6763]), plus the ANY pseudo type used by probe queries.
/// Everything else is a wire-format fault.
///
/// [rfc6763]: https://datatracker.ietf.org/doc/html/rfc6763
#[derive(Copy, Clone, Debug, Display, EnumString, Eq, FromPrimitive, Hash, PartialEq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u16)]
pub enum Type {
    /// IPv4 Address.
    A = 1,

    /// Domain name pointer, from a service type to its instances. Shared.
    PTR = 12,

    /// Text strings.
    TXT = 16,

    /// Server Selection, see [rfc2782].
    ///
    /// [rfc2782]: https://datatracker.ietf.org/doc/html/rfc2782
    SRV = 33,

    /// Any record type.
    /// Only valid as a Question Type; probes use it.
    ANY = 255,
}

/// Defaults to [`Type::ANY`].
impl Default for Type {
    fn default() -> Self {
        Type::ANY
    }
}

/// Resource Record Class. Multicast DNS lives entirely in the Internet
/// class; the top bit of the wire field is carried separately (see
/// [`Record::cache_flush`] and [`Question::unicast_response`]).
#[derive(Copy, Clone, Debug, Display, EnumString, Eq, FromPrimitive, Hash, PartialEq)]
#[repr(u16)]
pub enum Class {
    /// (Default) The Internet (IN), see [rfc1035].
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    #[strum(serialize = "IN")]
    Internet = 1,

    /// * (ANY) See [rfc1035]
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    #[strum(serialize = "*")]
    Any = 255,
}

/// Defaults to [`Class::Internet`].
impl Default for Class {
    fn default() -> Self {
        Class::Internet
    }
}

/// Bit 15 of the wire class field. On a record it is the cache-flush bit,
/// on a question the unicast-response (QU) bit. See [rfc6762] sections 10.2
/// and 5.4.
///
/// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
pub(crate) const CLASS_TOP_BIT: u16 = 0x8000;

/// Mask selecting the actual class out of the wire class field.
pub(crate) const CLASS_MASK: u16 = 0x7FFF;
