//! Extraction schemas and instruction texts sent to the automation service.

use serde_json::json;

use crate::automation::ExtractionSchema;

/// Transaction list schema name
pub const TRANSACTIONS: &str = "transactions";
/// "More pages" detection schema name
pub const PAGINATION: &str = "pagination";
/// Per-transaction detail schema name
pub const TRANSACTION_DETAILS: &str = "transaction_details";
/// Address category schema name
pub const ADDRESS_PROFILE: &str = "address_profile";

/// Appended to every extraction instruction
pub const NO_FABRICATION: &str = "Only report values that are visibly present on the page. \
If a field is not shown, omit it. Never guess, infer or invent values.";

/// Pagination step
pub const NEXT_PAGE_INSTRUCTION: &str =
    "Click the next page control of the transaction list and wait for the table to reload.";

/// Schema for one page of transactions
#[must_use]
pub fn transactions() -> ExtractionSchema {
    ExtractionSchema {
        name: TRANSACTIONS.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "transactions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "hash": { "type": "string" },
                            "timestamp": { "type": "string" },
                            "from": { "type": "string" },
                            "to": { "type": "string" },
                            "value": { "type": "string" },
                            "type": { "type": "string" },
                            "status": { "type": "string" }
                        },
                        "required": ["hash"]
                    }
                }
            },
            "required": ["transactions"]
        }),
    }
}

/// Schema for pagination detection
#[must_use]
pub fn pagination() -> ExtractionSchema {
    ExtractionSchema {
        name: PAGINATION.to_string(),
        schema: json!({
            "type": "object",
            "properties": { "has_next_page": { "type": "boolean" } },
            "required": ["has_next_page"]
        }),
    }
}

/// Schema for the transaction detail panel
#[must_use]
pub fn transaction_details() -> ExtractionSchema {
    ExtractionSchema {
        name: TRANSACTION_DETAILS.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "gas": { "type": "string" },
                "nonce": { "type": "string" },
                "block_number": { "type": "string" },
                "method": { "type": "string" }
            }
        }),
    }
}

/// Schema for address categorization
#[must_use]
pub fn address_profile() -> ExtractionSchema {
    ExtractionSchema {
        name: ADDRESS_PROFILE.to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": [
                        "main", "alt_wallet", "cex", "defi", "bridge",
                        "mixer", "contract", "flagged", "unknown"
                    ]
                },
                "label": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "is_contract": { "type": "boolean" }
            },
            "required": ["category"]
        }),
    }
}

/// Locate the search affordance and look up an address or hash
#[must_use]
pub fn search(term: &str) -> String {
    format!("Find the search bar on this page, enter {term} and submit the search.")
}

/// Extract the visible transaction table
#[must_use]
pub fn extract_transactions(address: &str, focus: Option<&str>) -> String {
    let focus = focus.map_or_else(String::new, |f| format!(" Focus on {f}."));
    format!(
        "Extract every row of the transaction list shown for address {address}: hash, timestamp, \
         from, to, value, type and status.{focus} {NO_FABRICATION}"
    )
}

/// Detect a usable next-page control
#[must_use]
pub fn detect_next_page() -> String {
    format!(
        "Report whether the transaction list has an enabled control leading to a further page. \
         {NO_FABRICATION}"
    )
}

/// Extract the detail panel of one transaction
#[must_use]
pub fn extract_details(hash: &str) -> String {
    format!(
        "Extract gas used, nonce, block number and the called method for transaction {hash}. \
         {NO_FABRICATION}"
    )
}

/// Categorize an address from its page
#[must_use]
pub fn categorize(address: &str) -> String {
    format!(
        "Classify address {address} as one of main, alt_wallet, cex, defi, bridge, mixer, \
         contract, flagged or unknown. Base the category only on labels, name tags, contract \
         markers and the visible transaction pattern; answer unknown when the page shows no \
         evidence. \
         {NO_FABRICATION}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_forbid_fabrication() {
        for text in [
            extract_transactions("0xabc", None),
            detect_next_page(),
            extract_details("0xdef"),
            categorize("0xabc"),
        ] {
            assert!(text.contains("Never guess"), "{text}");
        }
    }

    #[test]
    fn test_search_mentions_term() {
        assert!(search("0xfeed").contains("0xfeed"));
        assert!(extract_transactions("0xabc", Some("NFT transfers")).contains("NFT transfers"));
    }

    #[test]
    fn test_transaction_schema_requires_hash_only() {
        let schema = transactions();
        assert_eq!(
            schema.schema["properties"]["transactions"]["items"]["required"],
            json!(["hash"])
        );
    }
}
