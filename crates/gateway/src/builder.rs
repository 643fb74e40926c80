//! Transaction construction and signing
//!
//! Operations and memos are described by closed sets of variants and turned
//! into a signed Stellar `TransactionEnvelope` by [`build_envelope`].
//! Validation failures are reported as [`BuildError`] and never reach the
//! network.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use gateway_common::{decode_account_id, encode_account_id, BuildError, Keypair};
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    AccountId, AlphaNum12, AlphaNum4, Asset, AssetCode12, AssetCode4, CreateAccountOp,
    DecoratedSignature, Hash, Limits, Memo, MuxedAccount, Operation, OperationBody, PaymentOp,
    Preconditions, PublicKey, ReadXdr, SequenceNumber, Signature, SignatureHint, StringM,
    Transaction, TransactionEnvelope, TransactionExt, TransactionV1Envelope, Uint256, VecM,
    WriteXdr,
};

/// Base fee per operation, in stroops
pub const BASE_FEE: u32 = 100;

/// Maximum number of operations in one transaction
pub const MAX_OPERATIONS: usize = 100;

/// Maximum length of a text memo, in bytes
pub const MAX_MEMO_TEXT_LEN: usize = 28;

/// ENVELOPE_TYPE_TX discriminant used in the signature payload
const ENVELOPE_TYPE_TX: u32 = 2;

const STROOPS_PER_UNIT: i64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetDescriptor {
    Native,
    Credit { code: String, issuer: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationDescriptor {
    Payment {
        destination: String,
        asset: AssetDescriptor,
        amount: String,
    },
    CreateAccount {
        destination: String,
        starting_balance: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MemoDescriptor {
    #[default]
    None,
    Id(u64),
    Text(String),
    Hash([u8; 32]),
}

/// Everything needed to build one transaction except its sequence number
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub source: String,
    pub operations: Vec<OperationDescriptor>,
    pub memo: MemoDescriptor,
    pub network_passphrase: String,
}

/// A signed envelope ready for submission
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    /// Hex-encoded transaction hash
    pub hash: String,
    pub sequence: u64,
    /// Base64 XDR `TransactionEnvelope`
    pub envelope_xdr: String,
}

/// Build and sign a transaction for `request` at `sequence`
pub fn build_envelope(
    request: &TransactionRequest,
    sequence: u64,
    keypair: &Keypair,
) -> Result<SignedEnvelope, BuildError> {
    if request.operations.is_empty() || request.operations.len() > MAX_OPERATIONS {
        return Err(BuildError::OperationCount(request.operations.len()));
    }

    let seq_num = i64::try_from(sequence).map_err(|_| BuildError::SequenceOverflow(sequence))?;

    let operations = request
        .operations
        .iter()
        .map(build_operation)
        .collect::<Result<Vec<_>, _>>()?;
    let fee = BASE_FEE * operations.len() as u32;
    let operations: VecM<Operation, 100> = operations
        .try_into()
        .map_err(|_| BuildError::OperationCount(request.operations.len()))?;

    let transaction = Transaction {
        source_account: muxed_account(&request.source)?,
        fee,
        seq_num: SequenceNumber(seq_num),
        cond: Preconditions::None,
        memo: build_memo(&request.memo)?,
        operations,
        ext: TransactionExt::V0,
    };

    let hash = transaction_hash(&transaction, &request.network_passphrase)?;
    let signature = keypair.sign(&hash);

    let decorated = DecoratedSignature {
        hint: SignatureHint(keypair.hint()),
        signature: Signature(
            signature
                .to_vec()
                .try_into()
                .map_err(|_| BuildError::Encoding("invalid signature length".to_string()))?,
        ),
    };
    let signatures: VecM<DecoratedSignature, 20> = vec![decorated]
        .try_into()
        .map_err(|_| BuildError::Encoding("failed to create signatures".to_string()))?;

    let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
        tx: transaction,
        signatures,
    });
    let envelope_xdr = envelope
        .to_xdr(Limits::none())
        .map_err(|e| BuildError::Encoding(format!("failed to encode envelope: {}", e)))?;

    Ok(SignedEnvelope {
        hash: hex::encode(hash),
        sequence,
        envelope_xdr: BASE64.encode(envelope_xdr),
    })
}

/// Source account and sequence number carried by a base64 envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeSummary {
    pub source: String,
    pub sequence: u64,
    pub transaction: Transaction,
}

/// Decode a base64 envelope produced by [`build_envelope`]
pub fn inspect_envelope(envelope: &str) -> Result<EnvelopeSummary, BuildError> {
    let bytes = BASE64
        .decode(envelope)
        .map_err(|e| BuildError::Encoding(format!("invalid base64: {}", e)))?;
    let envelope = TransactionEnvelope::from_xdr(bytes, Limits::none())
        .map_err(|e| BuildError::Encoding(format!("invalid envelope: {}", e)))?;

    let transaction = match envelope {
        TransactionEnvelope::Tx(v1) => v1.tx,
        _ => return Err(BuildError::Encoding("unsupported envelope type".to_string())),
    };

    let source = match &transaction.source_account {
        MuxedAccount::Ed25519(Uint256(key)) => encode_account_id(*key),
        MuxedAccount::MuxedEd25519(muxed) => encode_account_id(muxed.ed25519.0),
    };
    let sequence = u64::try_from(transaction.seq_num.0)
        .map_err(|_| BuildError::Encoding("negative sequence number".to_string()))?;

    Ok(EnvelopeSummary {
        source,
        sequence,
        transaction,
    })
}

/// Network id is the SHA-256 of the passphrase
pub fn network_id(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// Parse a decimal amount into stroops (7 fractional digits)
pub fn parse_amount(amount: &str) -> Result<i64, BuildError> {
    let invalid = || BuildError::InvalidAmount(amount.to_string());

    let (whole, fraction) = match amount.split_once('.') {
        Some((_, "")) => return Err(invalid()),
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };

    if whole.is_empty()
        || fraction.len() > 7
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let fraction: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<7}", fraction).parse().map_err(|_| invalid())?
    };

    let stroops = whole
        .checked_mul(STROOPS_PER_UNIT)
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(invalid)?;

    if stroops <= 0 {
        return Err(invalid());
    }

    Ok(stroops)
}

/// Format stroops as a decimal amount with 7 fractional digits
pub fn format_amount(stroops: i64) -> String {
    let sign = if stroops < 0 { "-" } else { "" };
    let abs = stroops.unsigned_abs();
    let unit = STROOPS_PER_UNIT as u64;
    format!("{}{}.{:07}", sign, abs / unit, abs % unit)
}

fn transaction_hash(transaction: &Transaction, passphrase: &str) -> Result<[u8; 32], BuildError> {
    let tx_xdr = transaction
        .to_xdr(Limits::none())
        .map_err(|e| BuildError::Encoding(format!("failed to encode transaction: {}", e)))?;

    let mut preimage = Vec::with_capacity(36 + tx_xdr.len());
    preimage.extend_from_slice(&network_id(passphrase));
    preimage.extend_from_slice(&ENVELOPE_TYPE_TX.to_be_bytes());
    preimage.extend_from_slice(&tx_xdr);

    Ok(Sha256::digest(&preimage).into())
}

fn build_operation(descriptor: &OperationDescriptor) -> Result<Operation, BuildError> {
    let body = match descriptor {
        OperationDescriptor::Payment {
            destination,
            asset,
            amount,
        } => OperationBody::Payment(PaymentOp {
            destination: muxed_account(destination)?,
            asset: build_asset(asset)?,
            amount: parse_amount(amount)?,
        }),
        OperationDescriptor::CreateAccount {
            destination,
            starting_balance,
        } => OperationBody::CreateAccount(CreateAccountOp {
            destination: account_id(destination)?,
            starting_balance: parse_amount(starting_balance)?,
        }),
    };

    Ok(Operation {
        source_account: None,
        body,
    })
}

fn build_asset(asset: &AssetDescriptor) -> Result<Asset, BuildError> {
    let (code, issuer) = match asset {
        AssetDescriptor::Native => return Ok(Asset::Native),
        AssetDescriptor::Credit { code, issuer } => (code, issuer),
    };

    if code.is_empty() || code.len() > 12 || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(BuildError::InvalidAssetCode(code.clone()));
    }
    let issuer = account_id(issuer)?;

    if code.len() <= 4 {
        let mut bytes = [0u8; 4];
        bytes[..code.len()].copy_from_slice(code.as_bytes());
        Ok(Asset::CreditAlphanum4(AlphaNum4 {
            asset_code: AssetCode4(bytes),
            issuer,
        }))
    } else {
        let mut bytes = [0u8; 12];
        bytes[..code.len()].copy_from_slice(code.as_bytes());
        Ok(Asset::CreditAlphanum12(AlphaNum12 {
            asset_code: AssetCode12(bytes),
            issuer,
        }))
    }
}

fn build_memo(memo: &MemoDescriptor) -> Result<Memo, BuildError> {
    match memo {
        MemoDescriptor::None => Ok(Memo::None),
        MemoDescriptor::Id(id) => Ok(Memo::Id(*id)),
        MemoDescriptor::Hash(hash) => Ok(Memo::Hash(Hash(*hash))),
        MemoDescriptor::Text(text) => {
            if text.len() > MAX_MEMO_TEXT_LEN {
                return Err(BuildError::InvalidMemo(format!(
                    "text memo is {} bytes, limit is {}",
                    text.len(),
                    MAX_MEMO_TEXT_LEN
                )));
            }
            let text: StringM<28> = text
                .as_bytes()
                .to_vec()
                .try_into()
                .map_err(|_| BuildError::InvalidMemo(text.clone()))?;
            Ok(Memo::Text(text))
        }
    }
}

fn account_id(address: &str) -> Result<AccountId, BuildError> {
    let key = decode_account_id(address)
        .ok_or_else(|| BuildError::InvalidAccount(address.to_string()))?;
    Ok(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key))))
}

fn muxed_account(address: &str) -> Result<MuxedAccount, BuildError> {
    let key = decode_account_id(address)
        .ok_or_else(|| BuildError::InvalidAccount(address.to_string()))?;
    Ok(MuxedAccount::Ed25519(Uint256(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Verifier, VerifyingKey};

    const TESTNET: &str = "Test SDF Network ; September 2015";

    fn keypair(byte: u8) -> Keypair {
        let seed = stellar_strkey::ed25519::PrivateKey([byte; 32]).to_string();
        Keypair::from_secret(&seed).unwrap()
    }

    fn payment_request(source: &Keypair, memo: MemoDescriptor) -> TransactionRequest {
        TransactionRequest {
            source: source.address().to_string(),
            operations: vec![OperationDescriptor::Payment {
                destination: keypair(2).address().to_string(),
                asset: AssetDescriptor::Credit {
                    code: "USD".to_string(),
                    issuer: keypair(3).address().to_string(),
                },
                amount: "200".to_string(),
            }],
            memo,
            network_passphrase: TESTNET.to_string(),
        }
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("200").unwrap(), 2_000_000_000);
        assert_eq!(parse_amount("0.0000001").unwrap(), 1);
        assert_eq!(parse_amount("1.5").unwrap(), 15_000_000);

        for bad in ["", "abc", "-1", "0", "1.", ".5", "1.12345678", "1e5", "99999999999999"] {
            assert!(
                matches!(parse_amount(bad), Err(BuildError::InvalidAmount(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(2_000_000_000), "200.0000000");
        assert_eq!(format_amount(1), "0.0000001");
        assert_eq!(parse_amount(&format_amount(15_000_000)).unwrap(), 15_000_000);
    }

    #[test]
    fn test_build_signed_payment() {
        let source = keypair(1);
        let request = payment_request(&source, MemoDescriptor::Text("hello".to_string()));

        let signed = build_envelope(&request, 42, &source).unwrap();
        assert_eq!(signed.sequence, 42);

        let summary = inspect_envelope(&signed.envelope_xdr).unwrap();
        assert_eq!(summary.source, source.address());
        assert_eq!(summary.sequence, 42);
        assert_eq!(summary.transaction.fee, BASE_FEE);
        assert_eq!(summary.transaction.operations.len(), 1);
        match &summary.transaction.memo {
            Memo::Text(text) => assert_eq!(text.to_string(), "hello"),
            other => panic!("unexpected memo {:?}", other),
        }
    }

    #[test]
    fn test_signature_verifies_against_hash() {
        let source = keypair(1);
        let request = payment_request(&source, MemoDescriptor::Id(7));
        let signed = build_envelope(&request, 1, &source).unwrap();

        let bytes = BASE64.decode(&signed.envelope_xdr).unwrap();
        let envelope = TransactionEnvelope::from_xdr(bytes, Limits::none()).unwrap();
        let TransactionEnvelope::Tx(v1) = envelope else {
            panic!("expected v1 envelope");
        };

        let hash = transaction_hash(&v1.tx, TESTNET).unwrap();
        assert_eq!(hex::encode(hash), signed.hash);

        let signature: [u8; 64] = v1.signatures[0].signature.0.as_slice().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&source.public_key()).unwrap();
        verifying_key
            .verify(&hash, &ed25519_dalek::Signature::from_bytes(&signature))
            .unwrap();
    }

    #[test]
    fn test_long_text_memo_is_rejected() {
        let source = keypair(1);
        let request = payment_request(
            &source,
            MemoDescriptor::Text("12345678901234567890123456789".to_string()),
        );

        assert!(matches!(
            build_envelope(&request, 1, &source),
            Err(BuildError::InvalidMemo(_))
        ));
    }

    #[test]
    fn test_invalid_asset_code() {
        let source = keypair(1);
        let mut request = payment_request(&source, MemoDescriptor::None);
        request.operations = vec![OperationDescriptor::Payment {
            destination: keypair(2).address().to_string(),
            asset: AssetDescriptor::Credit {
                code: "THIRTEENCHARS".to_string(),
                issuer: keypair(3).address().to_string(),
            },
            amount: "1".to_string(),
        }];

        assert!(matches!(
            build_envelope(&request, 1, &source),
            Err(BuildError::InvalidAssetCode(_))
        ));
    }

    #[test]
    fn test_long_asset_code_uses_alphanum12() {
        let asset = build_asset(&AssetDescriptor::Credit {
            code: "LONGCODE".to_string(),
            issuer: keypair(3).address().to_string(),
        })
        .unwrap();
        assert!(matches!(asset, Asset::CreditAlphanum12(_)));
    }

    #[test]
    fn test_create_account_and_invalid_destination() {
        let source = keypair(1);
        let mut request = payment_request(&source, MemoDescriptor::None);
        request.operations = vec![OperationDescriptor::CreateAccount {
            destination: keypair(4).address().to_string(),
            starting_balance: "10".to_string(),
        }];
        assert!(build_envelope(&request, 1, &source).is_ok());

        request.operations = vec![OperationDescriptor::CreateAccount {
            destination: "GNOTANACCOUNT".to_string(),
            starting_balance: "10".to_string(),
        }];
        assert!(matches!(
            build_envelope(&request, 1, &source),
            Err(BuildError::InvalidAccount(_))
        ));
    }

    #[test]
    fn test_empty_operations_rejected() {
        let source = keypair(1);
        let mut request = payment_request(&source, MemoDescriptor::None);
        request.operations.clear();
        assert!(matches!(
            build_envelope(&request, 1, &source),
            Err(BuildError::OperationCount(0))
        ));
    }

    #[test]
    fn test_fee_scales_with_operations() {
        let source = keypair(1);
        let mut request = payment_request(&source, MemoDescriptor::None);
        let op = request.operations[0].clone();
        request.operations.push(op);

        let signed = build_envelope(&request, 5, &source).unwrap();
        let summary = inspect_envelope(&signed.envelope_xdr).unwrap();
        assert_eq!(summary.transaction.fee, 2 * BASE_FEE);
    }
}
