//! Bank-transfer receipts: text extraction, attachment storage and review flags.
//!
//! [`TextReceiptExtractor`] reads the OCR text of a bank transfer confirmation:
//!
//! ```text
//! Transfer SUCCESS
//! 1,250.00 MVR
//! From: AHMED ALI
//! To: BLUE LAGOON FERRIES
//! Reference BLAZ202501011234
//! ```
//!
//! Confidence is the share of the five fields that could be read.

use crate::config::PaymentConfig;
use ferry_core::environment::{
    AttachmentStore, BoxFuture, ExtractionError, ReceiptExtractor, StoreError,
};
use ferry_core::payment::{OcrExtraction, ReviewFlag, TransferStatus};
use ferry_core::types::{Currency, Money, ReceiptId};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const FIELD_COUNT: f64 = 5.0;

/// Extracts transfer details from receipt text with regular expressions
#[derive(Debug, Clone)]
pub struct TextReceiptExtractor {
    amount: Regex,
    reference: Regex,
    account: Regex,
}

impl TextReceiptExtractor {
    /// Compiles the receipt patterns
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::Unavailable`] if a pattern fails to compile.
    pub fn new() -> Result<Self, ExtractionError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| ExtractionError::Unavailable(err.to_string()))
        };
        Ok(Self {
            amount: compile(r"(\d+(?:,\d{3})*(?:\.\d{2})?)\s*(MVR|USD)")?,
            reference: compile(r"[A-Z]{4}\d{12}")?,
            account: compile(r"To:[ \t]*([A-Z][A-Z \t]*)")?,
        })
    }

    /// Parses receipt text
    #[must_use]
    pub fn parse(&self, text: &str) -> OcrExtraction {
        let (amount, currency) = self
            .amount
            .captures(text)
            .map_or((None, None), |caps| {
                (
                    caps.get(1).and_then(|m| parse_amount(m.as_str())),
                    caps.get(2).map(|m| Currency::new(m.as_str())),
                )
            });
        let reference = self.reference.find(text).map(|m| m.as_str().to_string());
        let account = self
            .account
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|account| !account.is_empty());

        let upper = text.to_ascii_uppercase();
        let transfer_status = if upper.contains("SUCCESS") {
            Some(TransferStatus::Success)
        } else if upper.contains("FAILED") {
            Some(TransferStatus::Failed)
        } else if upper.contains("PENDING") {
            Some(TransferStatus::Pending)
        } else {
            None
        };

        let found = [
            amount.is_some(),
            currency.is_some(),
            reference.is_some(),
            account.is_some(),
            transfer_status.is_some(),
        ]
        .into_iter()
        .filter(|found| *found)
        .count();

        OcrExtraction {
            amount,
            currency,
            account,
            reference,
            transfer_status,
            confidence: f64::from(u8::try_from(found).unwrap_or(u8::MAX)) / FIELD_COUNT,
        }
    }
}

/// `"1,250.5"` style amounts to minor units
fn parse_amount(raw: &str) -> Option<Money> {
    let cleaned = raw.replace(',', "");
    let (major, minor) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), "0"));
    let major: u64 = major.parse().ok()?;
    let minor: u64 = format!("{minor:0<2}").get(..2)?.parse().ok()?;
    Money::checked_from_major(major)?.checked_add(Money::from_cents(minor))
}

impl ReceiptExtractor for TextReceiptExtractor {
    fn extract(
        &self,
        content: Arc<[u8]>,
    ) -> BoxFuture<'_, Result<OcrExtraction, ExtractionError>> {
        Box::pin(async move {
            let text = String::from_utf8_lossy(&content);
            let extraction = self.parse(&text);
            if extraction.confidence <= 0.0 {
                return Err(ExtractionError::Unreadable(
                    "no transfer details found".to_string(),
                ));
            }
            tracing::debug!(confidence = extraction.confidence, "Receipt text parsed");
            Ok(extraction)
        })
    }
}

/// Attachment store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryAttachmentStore {
    files: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl InMemoryAttachmentStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content stored under `path`
    pub async fn get(&self, path: &str) -> Option<Arc<[u8]>> {
        self.files.read().await.get(path).cloned()
    }
}

impl AttachmentStore for InMemoryAttachmentStore {
    fn put(
        &self,
        receipt_id: ReceiptId,
        content: Arc<[u8]>,
    ) -> BoxFuture<'_, Result<String, StoreError>> {
        Box::pin(async move {
            let path = format!("receipts/{receipt_id}");
            self.files.write().await.insert(path.clone(), content);
            Ok(path)
        })
    }
}

/// Review flags for an extraction against what the booking expects
///
/// An empty result means the receipt can be verified without a human.
#[must_use]
pub fn assess(
    extraction: &OcrExtraction,
    expected_amount: Money,
    expected_currency: &Currency,
    config: &PaymentConfig,
) -> Vec<ReviewFlag> {
    let mut flags = Vec::new();

    if extraction.confidence < config.ocr_confidence_threshold {
        flags.push(ReviewFlag::LowConfidence);
    }
    if extraction
        .amount
        .is_none_or(|amount| amount.abs_diff(expected_amount) > config.amount_tolerance)
    {
        flags.push(ReviewFlag::AmountMismatch);
    }
    if extraction.currency.as_ref() != Some(expected_currency) {
        flags.push(ReviewFlag::CurrencyMismatch);
    }
    if let Some(expected) = &config.bank_account_name {
        let matches = extraction.account.as_ref().is_some_and(|account| {
            account
                .to_ascii_uppercase()
                .contains(&expected.to_ascii_uppercase())
        });
        if !matches {
            flags.push(ReviewFlag::AccountMismatch);
        }
    }
    if extraction.reference.is_none() {
        flags.push(ReviewFlag::ReferenceMissing);
    }
    if extraction.transfer_status != Some(TransferStatus::Success) {
        flags.push(ReviewFlag::TransferNotSuccessful);
    }
    flags
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const RECEIPT: &str = "Transfer SUCCESS\n1,250.00 MVR\nFrom: AHMED ALI\nTo: BLUE LAGOON FERRIES\nReference BLAZ202501011234\n";

    #[test]
    fn test_parses_full_receipt() {
        let extraction = TextReceiptExtractor::new().unwrap().parse(RECEIPT);

        assert_eq!(extraction.amount, Some(Money::from_cents(125_000)));
        assert_eq!(extraction.currency, Some(Currency::mvr()));
        assert_eq!(extraction.account.as_deref(), Some("BLUE LAGOON FERRIES"));
        assert_eq!(extraction.reference.as_deref(), Some("BLAZ202501011234"));
        assert_eq!(extraction.transfer_status, Some(TransferStatus::Success));
        assert!((extraction.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_receipt_lowers_confidence() {
        let extraction = TextReceiptExtractor::new().unwrap().parse("Payment PENDING 99.50 USD");

        assert_eq!(extraction.amount, Some(Money::from_cents(9_950)));
        assert_eq!(extraction.transfer_status, Some(TransferStatus::Pending));
        assert!((extraction.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_assess_flags_every_discrepancy() {
        let config = PaymentConfig {
            bank_account_name: Some("Blue Lagoon".to_string()),
            ..PaymentConfig::default()
        };
        let clean = TextReceiptExtractor::new().unwrap().parse(RECEIPT);
        assert!(assess(&clean, Money::from_cents(125_001), &Currency::mvr(), &config).is_empty());

        let flags = assess(&clean, Money::from_cents(120_000), &Currency::new("USD"), &config);
        assert_eq!(flags, vec![ReviewFlag::AmountMismatch, ReviewFlag::CurrencyMismatch]);

        let empty = OcrExtraction::default();
        let flags = assess(&empty, Money::from_cents(100), &Currency::mvr(), &config);
        assert_eq!(
            flags,
            vec![
                ReviewFlag::LowConfidence,
                ReviewFlag::AmountMismatch,
                ReviewFlag::CurrencyMismatch,
                ReviewFlag::AccountMismatch,
                ReviewFlag::ReferenceMissing,
                ReviewFlag::TransferNotSuccessful,
            ]
        );
    }

    #[tokio::test]
    async fn test_unreadable_content_is_an_error() {
        let extractor = TextReceiptExtractor::new().unwrap();
        let result = extractor.extract(Arc::from(&b"\x89PNG binary noise"[..])).await;
        assert!(matches!(result, Err(ExtractionError::Unreadable(_))));
    }
}
