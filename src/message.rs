use std::{any::Any, collections::HashMap};

use mess_streams::{Entry, EntryId, Fields};

use crate::error::{Error, PubSubResult};

pub const BODY_FIELD: &str = "body";
pub const HEADERS_FIELD: &str = "headers";

pub type Metadata = HashMap<String, String>;

/// A message as published to, or received from, a topic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    /// Optional string headers. `None` and an empty map are both fine to
    /// publish; received messages keep whatever was published.
    pub metadata: Option<Metadata>,
    received: Option<Entry>,
}

impl Message {
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into(), metadata: None, received: None }
    }

    #[must_use]
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    /// The id to acknowledge this message with. Only set on received
    /// messages.
    #[must_use]
    pub fn ack_id(&self) -> Option<EntryId> {
        self.received.as_ref().map(|e| e.id)
    }

    /// Identifier suitable for logs, e.g. `msg 1700000000000-0`.
    #[must_use]
    pub fn loggable_id(&self) -> Option<String> {
        self.ack_id().map(|id| format!("msg {id}"))
    }

    /// The underlying value this message was decoded from, if it is a `T`.
    /// Received messages expose the raw [`Entry`].
    #[must_use]
    pub fn as_raw<T: Any>(&self) -> Option<&T> {
        let raw: &dyn Any = self.received.as_ref()?;
        raw.downcast_ref()
    }

    /// Stream fields for this message: `body`, then `headers` as a JSON
    /// object when there is metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the headers cannot be serialized.
    pub fn encode(&self) -> PubSubResult<Fields> {
        let mut fields = Fields::new().with(BODY_FIELD, self.body.clone());
        if let Some(metadata) = &self.metadata {
            fields.push(HEADERS_FIELD, serde_json::to_vec(metadata)?);
        }
        Ok(fields)
    }

    /// # Errors
    ///
    /// `Error::MissingField` without a `body` field and
    /// `Error::MalformedHeaders` if `headers` is not a JSON string map.
    pub fn decode(entry: Entry) -> PubSubResult<Self> {
        let id = entry.id;
        let body = entry
            .fields
            .get(BODY_FIELD)
            .ok_or(Error::MissingField { id, field: BODY_FIELD })?
            .to_vec();
        let metadata = entry
            .fields
            .get(HEADERS_FIELD)
            .map(serde_json::from_slice::<Metadata>)
            .transpose()
            .map_err(|source| Error::MalformedHeaders { id, source })?;
        Ok(Self { body, metadata, received: Some(entry) })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::*;

    fn entry(fields: Fields) -> Entry {
        Entry { id: EntryId::new(7, 1), fields }
    }

    mod encode {
        use super::*;
        use pretty_assertions::assert_eq;

        #[rstest]
        fn absent_metadata_omits_headers() {
            let fields = Message::new("Message #1").encode().unwrap();
            assert_eq!(fields, Fields::new().with("body", "Message #1"));
        }

        #[rstest]
        fn metadata_becomes_a_json_object() {
            let fields = Message::new("x")
                .with_metadata("language", "en")
                .encode()
                .unwrap();
            let headers = br#"{"language":"en"}"#;
            assert_eq!(fields.get("headers"), Some(&headers[..]));
        }
    }

    mod decode {
        use super::*;
        use pretty_assertions::assert_eq;

        #[rstest]
        fn it_reads_body_and_headers() {
            let headers = r#"{"language":"en","importance":"high"}"#;
            let fields = Fields::new()
                .with("body", "Message #1")
                .with("headers", headers);
            let msg = Message::decode(entry(fields)).unwrap();
            assert_eq!(msg.body, b"Message #1");
            let metadata = msg.metadata.as_ref().unwrap();
            assert_eq!(metadata["language"], "en");
            assert_eq!(metadata["importance"], "high");
            assert_eq!(msg.ack_id(), Some(EntryId::new(7, 1)));
            assert_eq!(msg.loggable_id().as_deref(), Some("msg 7-1"));
        }

        #[rstest]
        fn missing_headers_are_none() {
            let msg =
                Message::decode(entry(Fields::new().with("body", ""))).unwrap();
            assert_eq!(msg.metadata, None);
            assert!(msg.body.is_empty());
        }

        #[rstest]
        fn missing_body_is_an_error() {
            let fields = Fields::new().with("headers", "{}");
            let err = Message::decode(entry(fields)).unwrap_err();
            assert!(matches!(
                err,
                Error::MissingField { id, field: "body" }
                    if id == EntryId::new(7, 1)
            ));
        }

        #[rstest]
        #[case(b"not json")]
        #[case(br#"{"n":1}"#)]
        #[case(br#"["a"]"#)]
        fn malformed_headers_are_an_error(#[case] headers: &[u8]) {
            let err = Message::decode(entry(
                Fields::new().with("body", "x").with("headers", headers),
            ))
            .unwrap_err();
            assert!(matches!(err, Error::MalformedHeaders { .. }), "{err:?}");
        }

        #[rstest]
        fn raw_entries_are_exposed_by_type() {
            let raw = entry(Fields::new().with("body", "x"));
            let msg = Message::decode(raw.clone()).unwrap();
            assert_eq!(msg.as_raw::<Entry>(), Some(&raw));
            assert_eq!(msg.as_raw::<String>(), None);
            assert_eq!(Message::new("x").as_raw::<Entry>(), None);
        }
    }

    proptest! {
        #[test]
        fn published_messages_decode_to_the_same_body_and_headers(
            body in proptest::collection::vec(any::<u8>(), 0..64),
            metadata in proptest::option::of(
                proptest::collection::hash_map("\\PC*", "\\PC*", 0..8)
            ),
        ) {
            let sent = Message { body, metadata, received: None };
            let fields = sent.encode().unwrap();
            let got = Message::decode(Entry { id: EntryId::new(1, 0), fields })
                .unwrap();
            prop_assert_eq!(got.body, sent.body);
            prop_assert_eq!(got.metadata, sent.metadata);
        }
    }
}
