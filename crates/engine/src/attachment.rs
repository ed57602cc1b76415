//! Attachment processing
//!
//! Runs before any document is resolved. Every inline attachment is
//! decoded from base64, measured and content-addressed; stubs pass through
//! untouched. A payload that does not decode fails its own document with
//! an invalid-argument error and nothing else.
//!
//! Attachments are independent of one another, so the pre-pass fans out
//! over rayon's pool: across documents and across each document's
//! attachments.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rayon::prelude::*;
use tracing::debug;

use revdb_core::{Attachment, AttachmentData, DocError};

use crate::digest::Digester;
use crate::parser::ParsedDoc;

/// Reason reported for an undecodable payload
pub const INVALID_BASE64_REASON: &str = "Attachment is not a valid base64 string";

/// Decode and address one attachment.
///
/// Stubs are returned unchanged. Already-binary payloads are addressed
/// without decoding.
pub fn process_attachment(
    doc_id: &str,
    name: &str,
    mut attachment: Attachment,
    digester: &dyn Digester,
) -> Result<Attachment, DocError> {
    if attachment.stub {
        return Ok(attachment);
    }

    let bytes = match attachment.data.take() {
        Some(AttachmentData::Encoded(text)) => BASE64.decode(text.as_bytes()).map_err(|e| {
            debug!(target: "revdb::attach", doc_id, name, error = %e, "Attachment payload did not decode");
            DocError::InvalidArgument {
                id: doc_id.to_string(),
                name: name.to_string(),
                reason: INVALID_BASE64_REASON.to_string(),
            }
        })?,
        Some(AttachmentData::Binary(bytes)) => bytes,
        None => {
            return Err(DocError::InvalidArgument {
                id: doc_id.to_string(),
                name: name.to_string(),
                reason: "Attachment has no data".to_string(),
            })
        }
    };

    attachment.length = Some(bytes.len() as u64);
    attachment.digest = Some(digester.digest(&bytes));
    attachment.data = Some(AttachmentData::Binary(bytes));
    Ok(attachment)
}

/// Process every attachment of one document in place.
///
/// On failure the document's attachments are left as they were and the
/// error for the first failing name (in name order) is returned.
pub fn process_doc(doc: &mut ParsedDoc, digester: &dyn Digester) -> Result<(), DocError> {
    if doc.attachments.is_empty() {
        return Ok(());
    }
    let id = doc.id.as_str();
    let slots: Vec<Result<(String, Attachment), DocError>> = doc
        .attachments
        .par_iter()
        .map(|(name, att)| {
            process_attachment(id, name, att.clone(), digester).map(|att| (name.clone(), att))
        })
        .collect();
    // sequential fold keeps the reported error stable
    let processed = slots.into_iter().collect::<Result<Vec<_>, DocError>>()?;
    doc.attachments = processed.into_iter().collect();
    Ok(())
}

/// Run the pre-pass over a whole batch.
///
/// Returns one slot per document, in input order.
pub fn process_batch(docs: &mut [ParsedDoc], digester: &dyn Digester) -> Vec<Result<(), DocError>> {
    docs.par_iter_mut()
        .map(|doc| process_doc(doc, digester))
        .collect()
}
