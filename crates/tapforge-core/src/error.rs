//! Error types for tapforge primitives.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unexpected end of data")] UnexpectedEof,
    #[error("non-minimal compact size")] NonMinimalVarInt,
    #[error("{0} trailing bytes")] TrailingBytes(usize),
    #[error("length {0} exceeds limit")] OversizedLength(u64),
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("invalid segwit flag: {0:#04x}")] InvalidSegwitFlag(u8),
    #[error("segwit marker present but no witness data")] EmptyWitness,
    #[error("invalid base58: {0}")] Base58(String),
    #[error("invalid length: expected {expected}, got {got}")] InvalidLength { expected: usize, got: usize },
    #[error("unknown version bytes: {0}")] UnknownVersion(String),
    #[error("invalid key data: {0}")] InvalidKey(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid HRP")] InvalidHrp,
    #[error("invalid length")] InvalidLength,
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid character: {0}")] InvalidCharacter(char),
    #[error("invalid witness version: {0}")] InvalidVersion(u8),
    #[error("invalid padding bits")] InvalidPadding,
    #[error("unknown network: {0}")] UnknownNetwork(String),
    #[error("missing separator")] MissingSeparator,
    #[error("mixed case")] MixedCase,
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("unknown base58 prefix: {0:#04x}")] UnknownPrefix(u8),
    #[error("witness version {0} encoded with the wrong checksum variant")] WrongChecksumVariant(u8),
    #[error("invalid witness program length: {0}")] InvalidProgramLength(usize),
    #[error("script has no address form")] UnsupportedScript,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("push of {0} bytes exceeds the 4-byte length prefix")] PushTooLarge(usize),
    #[error("script too large: {size} > {max}")] ScriptTooLarge { size: usize, max: usize },
    #[error("truncated push at offset {0}")] TruncatedPush(usize),
    #[error("invalid public key")] InvalidKey,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaprootError {
    #[error("leaf version {0:#04x} is not even")] InvalidLeafVersion(u8),
    #[error("tree depth {0} exceeds 128")] TreeTooDeep(usize),
    #[error("tweak is not a valid scalar")] InvalidTweak,
    #[error("invalid internal key")] InvalidInternalKey,
    #[error("invalid control block: {0}")] InvalidControlBlock(String),
    #[error("leaf not found in tree")] LeafNotFound,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SighashError {
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("missing previous output for input {0}")] MissingPrevout(usize),
    #[error("prevout count {prevouts} does not match input count {inputs}")] PrevoutCountMismatch { inputs: usize, prevouts: usize },
    #[error("invalid sighash type: {0:#04x}")] InvalidSighashType(u32),
    #[error("SIGHASH_SINGLE without matching output for input {0}")] SingleWithoutOutput(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("zero-value UTXO: {0}")] ZeroValueUtxo(String),
    #[error("value overflow")] ValueOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Encoding(#[from] EncodingError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Script(#[from] ScriptError),
    #[error(transparent)] Taproot(#[from] TaprootError),
    #[error(transparent)] Sighash(#[from] SighashError),
}
