//! Store SCU over a DICOM upper-layer association
//!
//! One association is established per transfer pass and every object is sent
//! over it as a C-STORE request. Negotiation proposes one presentation
//! context per configured SOP class; the configured transfer syntaxes are
//! offered on all of them.
//!
//! Sending is limited to the uncompressed little-endian transfer syntaxes.
//! The exports this tool handles are stored in Explicit VR Little Endian, so
//! no transcoding pipeline is carried here; a file in a compressed syntax
//! fails its folder rather than being sent mangled.

use std::io::Write;

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::{DefaultDicomObject, InMemDicomObject};
use dicom_transfer_syntax_registry::entries;
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu, PresentationContextResultReason};
use dicom_ul::{ClientAssociation, ClientAssociationOptions};
use tracing::{debug, info};

use crate::accession::clean_str;
use crate::config::{ArchiveConfig, PresentationContextConfig};
use crate::error::{Error, Result};

use super::session::{StoreSession, StoreStatus};

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// C-STORE-RQ command field value
const C_STORE_RQ: u16 = 0x0001;
/// CommandDataSetType value announcing an attached data set
const DATA_SET_PRESENT: u16 = 0x0000;

/// A live store association with the archive.
pub struct DimseSession {
    assoc: ClientAssociation,
    /// Abstract syntaxes in proposal order; context id 2N+1 proposed the N-th
    requested: Vec<String>,
    message_id: u16,
}

impl DimseSession {
    /// Negotiate an association with the configured archive.
    pub fn establish(config: &ArchiveConfig) -> Result<Self> {
        let (requested, transfer_syntaxes) = proposed_contexts(&config.presentation_contexts);

        let mut options = ClientAssociationOptions::new()
            .calling_ae_title(config.calling_ae_title.clone())
            .called_ae_title(config.called_ae_title.clone());
        for abstract_syntax in &requested {
            options = options
                .with_presentation_context(abstract_syntax.clone(), transfer_syntaxes.clone());
        }

        let address = format!("{}:{}", config.host, config.port);
        info!(
            archive = %address,
            called = %config.called_ae_title,
            calling = %config.calling_ae_title,
            proposed = requested.len(),
            "establishing store association"
        );
        let assoc = options.establish_with(&address).map_err(|e| {
            Error::Association(format!("cannot associate with {address}: {e}"))
        })?;

        let accepted = assoc
            .presentation_contexts()
            .iter()
            .filter(|pc| pc.reason == PresentationContextResultReason::Acceptance)
            .count();
        if accepted == 0 {
            let _ = assoc.abort();
            return Err(Error::Association(format!(
                "archive {address} accepted none of the proposed presentation contexts"
            )));
        }
        info!(accepted, "association established");

        Ok(Self {
            assoc,
            requested,
            message_id: 0,
        })
    }

    /// Pick the accepted context for a SOP class, restricted to syntaxes we
    /// can encode.
    fn select_context(&self, sop_class_uid: &str) -> Result<(u8, String)> {
        let pc = self
            .assoc
            .presentation_contexts()
            .iter()
            .filter(|pc| pc.reason == PresentationContextResultReason::Acceptance)
            .filter(|pc| {
                // requested contexts get the odd ids 1, 3, 5... in order
                usize::from(pc.id)
                    .checked_sub(1)
                    .and_then(|i| self.requested.get(i / 2))
                    .map(String::as_str)
                    == Some(sop_class_uid)
            })
            .find(|pc| is_uncompressed_le(&pc.transfer_syntax))
            .ok_or_else(|| {
                Error::Association(format!(
                    "no accepted presentation context for SOP class {sop_class_uid}"
                ))
            })?;
        Ok((pc.id, pc.transfer_syntax.clone()))
    }

    fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }
}

impl StoreSession for DimseSession {
    fn store(&mut self, object: &DefaultDicomObject) -> Result<StoreStatus> {
        let meta = object.meta();
        let sop_class_uid = clean_str(&meta.media_storage_sop_class_uid).to_string();
        let sop_instance_uid = clean_str(&meta.media_storage_sop_instance_uid).to_string();
        let file_ts = clean_str(&meta.transfer_syntax).to_string();
        if !is_uncompressed_le(&file_ts) {
            return Err(Error::Dicom(format!(
                "transfer syntax {file_ts} would need transcoding"
            )));
        }

        let (pc_id, negotiated_ts) = self.select_context(&sop_class_uid)?;
        let message_id = self.next_message_id();
        debug!(
            sop_instance = %sop_instance_uid,
            pc_id,
            ts = %negotiated_ts,
            message_id,
            "sending store request"
        );

        // command set always travels in implicit VR little endian
        let command = store_request(&sop_class_uid, &sop_instance_uid, message_id);
        let mut command_data = Vec::new();
        command
            .write_dataset_with_ts(
                &mut command_data,
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .map_err(|e| Error::Dicom(format!("cannot encode command set: {e}")))?;

        let ts = match negotiated_ts.as_str() {
            IMPLICIT_VR_LE => entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            _ => entries::EXPLICIT_VR_LITTLE_ENDIAN.erased(),
        };
        let mut object_data = Vec::new();
        object
            .write_dataset_with_ts(&mut object_data, &ts)
            .map_err(|e| Error::Dicom(format!("cannot encode data set: {e}")))?;

        self.assoc
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: command_data,
                }],
            })
            .map_err(|e| Error::Association(format!("cannot send command set: {e}")))?;

        let mut writer = self.assoc.send_pdata(pc_id);
        writer.write_all(&object_data)?;
        writer
            .finish()
            .map_err(|e| Error::Association(format!("cannot finish data PDUs: {e}")))?;

        let response = self
            .assoc
            .receive()
            .map_err(|e| Error::Association(format!("no store response: {e}")))?;
        let status = match response {
            Pdu::PData { data } => {
                let value = data
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Association("empty store response".into()))?;
                let reply = InMemDicomObject::read_dataset_with_ts(
                    &value.data[..],
                    &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
                )
                .map_err(|e| Error::Dicom(format!("cannot decode store response: {e}")))?;
                reply
                    .element(tags::STATUS)
                    .map_err(|_| Error::Association("store response carries no status".into()))?
                    .to_int::<u16>()
                    .map_err(|e| Error::Dicom(e.to_string()))?
            }
            other => {
                return Err(Error::Association(format!(
                    "unexpected reply to store request: {other:?}"
                )))
            }
        };
        Ok(StoreStatus(status))
    }

    fn release(self) -> Result<()> {
        debug!("releasing store association");
        self.assoc
            .release()
            .map_err(|e| Error::Association(format!("release failed: {e}")))
    }
}

fn is_uncompressed_le(uid: &str) -> bool {
    uid == IMPLICIT_VR_LE || uid == EXPLICIT_VR_LE
}

/// Collapse the configured pairs into proposal lists: one presentation
/// context per distinct SOP class, each offering every configured transfer
/// syntax, in configuration order.
fn proposed_contexts(contexts: &[PresentationContextConfig]) -> (Vec<String>, Vec<String>) {
    let mut abstract_syntaxes: Vec<String> = Vec::new();
    let mut transfer_syntaxes: Vec<String> = Vec::new();
    for pc in contexts {
        if !abstract_syntaxes.contains(&pc.abstract_syntax) {
            abstract_syntaxes.push(pc.abstract_syntax.clone());
        }
        if !transfer_syntaxes.contains(&pc.transfer_syntax) {
            transfer_syntaxes.push(pc.transfer_syntax.clone());
        }
    }
    (abstract_syntaxes, transfer_syntaxes)
}

/// Build the C-STORE-RQ command set.
fn store_request(sop_class_uid: &str, sop_instance_uid: &str, message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class_uid),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(C_STORE_RQ)),
        DataElement::new(tags::MESSAGE_ID, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::PRIORITY, VR::US, PrimitiveValue::from(0x0000_u16)),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            PrimitiveValue::from(DATA_SET_PRESENT),
        ),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance_uid),
        ),
    ])
}
