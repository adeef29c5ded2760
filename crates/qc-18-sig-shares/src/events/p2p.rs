//! P2P message types for the Signature Shares subsystem.

use super::codec::{
    read_batched, read_inventory, read_session_announce, read_sig_share, write_batched,
    write_inventory, write_session_announce, write_sig_share, CodecError, Reader, Writer,
};
use crate::domain::{BatchedSigShares, SessionAnnounce, SharesInventory, SigShare};

pub const CMD_SIG_SES_ANN: &str = "qsigsesann";
pub const CMD_SIG_SHARES_INV: &str = "qsigsinv";
pub const CMD_GET_SIG_SHARES: &str = "qgetsigs";
pub const CMD_BATCHED_SIG_SHARES: &str = "qbsigs";
pub const CMD_SIG_SHARE: &str = "qsigshare";

/// P2P network messages for signature share exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigSharesMessage {
    /// Binds our session ids to sign hashes
    SessionAnnouncements(Vec<SessionAnnounce>),
    /// Shares we hold
    Inventories(Vec<SharesInventory>),
    /// Shares we want
    GetSigShares(Vec<SharesInventory>),
    /// Shares answering a request
    BatchedSigShares(Vec<BatchedSigShares>),
    /// Fully self-describing shares, pushed without a session
    SigShares(Vec<SigShare>),
}

impl SigSharesMessage {
    pub fn is_known_command(command: &str) -> bool {
        matches!(
            command,
            CMD_SIG_SES_ANN
                | CMD_SIG_SHARES_INV
                | CMD_GET_SIG_SHARES
                | CMD_BATCHED_SIG_SHARES
                | CMD_SIG_SHARE
        )
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::SessionAnnouncements(_) => CMD_SIG_SES_ANN,
            Self::Inventories(_) => CMD_SIG_SHARES_INV,
            Self::GetSigShares(_) => CMD_GET_SIG_SHARES,
            Self::BatchedSigShares(_) => CMD_BATCHED_SIG_SHARES,
            Self::SigShares(_) => CMD_SIG_SHARE,
        }
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        match self {
            Self::SessionAnnouncements(v) => v.len(),
            Self::Inventories(v) | Self::GetSigShares(v) => v.len(),
            Self::BatchedSigShares(v) => v.len(),
            Self::SigShares(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::SessionAnnouncements(anns) => {
                w.write_compact_size(anns.len() as u64);
                anns.iter().for_each(|ann| write_session_announce(&mut w, ann));
            }
            Self::Inventories(invs) | Self::GetSigShares(invs) => {
                w.write_compact_size(invs.len() as u64);
                invs.iter().for_each(|inv| write_inventory(&mut w, inv));
            }
            Self::BatchedSigShares(batches) => {
                w.write_compact_size(batches.len() as u64);
                batches.iter().for_each(|batch| write_batched(&mut w, batch));
            }
            Self::SigShares(shares) => {
                w.write_compact_size(shares.len() as u64);
                shares.iter().for_each(|share| write_sig_share(&mut w, share));
            }
        }
        w.into_bytes()
    }

    /// Decodes `payload` for `command`. The whole payload must be consumed.
    pub fn decode(command: &str, payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        let message = match command {
            CMD_SIG_SES_ANN => Self::SessionAnnouncements(r.read_vec(read_session_announce)?),
            CMD_SIG_SHARES_INV => Self::Inventories(r.read_vec(read_inventory)?),
            CMD_GET_SIG_SHARES => Self::GetSigShares(r.read_vec(read_inventory)?),
            CMD_BATCHED_SIG_SHARES => Self::BatchedSigShares(r.read_vec(read_batched)?),
            CMD_SIG_SHARE => Self::SigShares(r.read_vec(read_sig_share)?),
            other => return Err(CodecError::UnknownCommand(other.to_string())),
        };
        r.finish()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LazySignature, SignId};
    use shared_types::LlmqType;

    fn sign_id() -> SignId {
        SignId::new(LlmqType(1), [1; 32], [2; 32], [3; 32])
    }

    #[test]
    fn test_command_names() {
        assert_eq!(SigSharesMessage::SessionAnnouncements(vec![]).command(), "qsigsesann");
        assert_eq!(SigSharesMessage::Inventories(vec![]).command(), "qsigsinv");
        assert_eq!(SigSharesMessage::GetSigShares(vec![]).command(), "qgetsigs");
        assert_eq!(SigSharesMessage::BatchedSigShares(vec![]).command(), "qbsigs");
        assert_eq!(SigSharesMessage::SigShares(vec![]).command(), "qsigshare");
        assert!(SigSharesMessage::is_known_command("qsigsinv"));
        assert!(!SigSharesMessage::is_known_command("inv"));
    }

    #[test]
    fn test_session_announcement_decodes() {
        let msg = SigSharesMessage::SessionAnnouncements(vec![SessionAnnounce {
            session_id: 300,
            sign_id: sign_id(),
        }]);
        let bytes = msg.encode();
        assert_eq!(SigSharesMessage::decode(CMD_SIG_SES_ANN, &bytes).unwrap(), msg);
    }

    #[test]
    fn test_batched_decodes() {
        let mut batch = BatchedSigShares::new(7);
        batch.sig_shares.push((3, LazySignature::from_bytes(vec![4; 96])));
        let msg = SigSharesMessage::BatchedSigShares(vec![batch]);
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 1 + 1 + 1 + 2 + 96);
        assert_eq!(SigSharesMessage::decode(CMD_BATCHED_SIG_SHARES, &bytes).unwrap(), msg);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = SigSharesMessage::Inventories(vec![]).encode();
        bytes.push(0);
        assert_eq!(
            SigSharesMessage::decode(CMD_SIG_SHARES_INV, &bytes),
            Err(CodecError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(matches!(
            SigSharesMessage::decode("qfoo", &[0]),
            Err(CodecError::UnknownCommand(_))
        ));
    }
}
