use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rdkafka::message::{BorrowedMessage, Headers, Message};
use thiserror::Error;

use crate::kafka::types::Partition;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    /// Headers of records received from the broker cannot be modified
    #[error("headers are read-only for records consumed from the broker")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    key: String,
    value: Option<Vec<u8>>,
}

impl RecordHeader {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

/// Ordered multimap of header keys to raw values.
///
/// Records built by application code get writable headers. Records wrapping a
/// consumed broker message get read-only headers and every mutation returns
/// [`HeaderError::Unsupported`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordHeaders {
    entries: Vec<RecordHeader>,
    read_only: bool,
}

impl RecordHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read_only(entries: Vec<(String, Option<Vec<u8>>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(key, value)| RecordHeader { key, value })
                .collect(),
            read_only: true,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn add(
        &mut self,
        key: impl Into<String>,
        value: Option<Vec<u8>>,
    ) -> Result<(), HeaderError> {
        if self.read_only {
            return Err(HeaderError::Unsupported);
        }
        self.entries.push(RecordHeader {
            key: key.into(),
            value,
        });
        Ok(())
    }

    /// Remove every header with the given key, returning how many were removed
    pub fn remove(&mut self, key: &str) -> Result<usize, HeaderError> {
        if self.read_only {
            return Err(HeaderError::Unsupported);
        }
        let before = self.entries.len();
        self.entries.retain(|h| h.key != key);
        Ok(before - self.entries.len())
    }

    pub fn get_first(&self, key: &str) -> Option<&RecordHeader> {
        self.entries.iter().find(|h| h.key == key)
    }

    pub fn get_last(&self, key: &str) -> Option<&RecordHeader> {
        self.entries.iter().rev().find(|h| h.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordHeader> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An owned record, either consumed from the broker or built by application code.
#[derive(Debug, Clone)]
pub struct Record {
    topic_partition: Partition,
    offset: i64,
    timestamp: SystemTime,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    headers: RecordHeaders,
}

impl Record {
    /// Build a record on the producer side. Headers are writable.
    pub fn new(topic: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        Self {
            topic_partition: Partition::new(topic.into(), -1),
            offset: -1,
            timestamp: SystemTime::now(),
            key: None,
            value,
            headers: RecordHeaders::new(),
        }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    /// Wrap a record consumed from the broker. Headers are read-only.
    pub fn consumed(
        topic_partition: Partition,
        offset: i64,
        timestamp: SystemTime,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
        headers: Vec<(String, Option<Vec<u8>>)>,
    ) -> Self {
        Self {
            topic_partition,
            offset,
            timestamp,
            key,
            value,
            headers: RecordHeaders::read_only(headers),
        }
    }

    /// Copy a borrowed message out of librdkafka's buffers
    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        // the broker may omit the create time; fall back to receive time
        let timestamp = msg
            .timestamp()
            .to_millis()
            .and_then(|ms| u64::try_from(ms).ok())
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
            .unwrap_or_else(SystemTime::now);

        let headers = msg
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| (h.key.to_string(), h.value.map(|v| v.to_vec())))
                    .collect()
            })
            .unwrap_or_default();

        Self::consumed(
            Partition::new(msg.topic().to_owned(), msg.partition()),
            msg.offset(),
            timestamp,
            msg.key().map(|k| k.to_vec()),
            msg.payload().map(|p| p.to_vec()),
            headers,
        )
    }

    pub fn topic(&self) -> &str {
        self.topic_partition.topic()
    }

    pub fn partition(&self) -> i32 {
        self.topic_partition.partition_number()
    }

    pub fn get_topic_partition(&self) -> &Partition {
        &self.topic_partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn headers(&self) -> &RecordHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut RecordHeaders {
        &mut self.headers
    }

    /// Get the record key as a UTF-8 string if possible
    pub fn key_as_str(&self) -> Option<Result<&str, std::str::Utf8Error>> {
        self.key.as_ref().map(|k| std::str::from_utf8(k))
    }

    pub fn value_as_str(&self) -> Option<Result<&str, std::str::Utf8Error>> {
        self.value.as_ref().map(|v| std::str::from_utf8(v))
    }

    #[cfg(test)]
    pub fn new_for_test(topic: &str, partition: i32, offset: i64) -> Self {
        Self::consumed(
            Partition::new(topic.to_string(), partition),
            offset,
            SystemTime::now(),
            None,
            Some(format!("value-{partition}-{offset}").into_bytes()),
            vec![],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumed_record_headers_are_read_only() {
        let mut record = Record::consumed(
            Partition::new("events".to_string(), 2),
            17,
            SystemTime::now(),
            Some(b"user-1".to_vec()),
            Some(b"{}".to_vec()),
            vec![
                ("trace".to_string(), Some(b"abc".to_vec())),
                ("trace".to_string(), Some(b"def".to_vec())),
                ("empty".to_string(), None),
            ],
        );

        assert_eq!(record.topic(), "events");
        assert_eq!(record.partition(), 2);
        assert_eq!(record.offset(), 17);
        assert_eq!(record.key_as_str().unwrap().unwrap(), "user-1");

        let headers = record.headers();
        assert!(headers.is_read_only());
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get_first("trace").unwrap().value(), Some(&b"abc"[..]));
        assert_eq!(headers.get_last("trace").unwrap().value(), Some(&b"def"[..]));
        assert_eq!(headers.get_first("empty").unwrap().value(), None);

        assert_eq!(
            record.headers_mut().add("new", Some(b"x".to_vec())),
            Err(HeaderError::Unsupported)
        );
        assert_eq!(
            record.headers_mut().remove("trace"),
            Err(HeaderError::Unsupported)
        );
        assert_eq!(record.headers().len(), 3);
    }

    #[test]
    fn test_producer_record_headers_are_writable() {
        let mut record = Record::new("output", Some(b"payload".to_vec())).with_key(b"k".to_vec());
        assert!(!record.headers().is_read_only());

        record.headers_mut().add("a", Some(b"1".to_vec())).unwrap();
        record.headers_mut().add("b", None).unwrap();
        record.headers_mut().add("a", Some(b"2".to_vec())).unwrap();

        let keys: Vec<&str> = record.headers().iter().map(|h| h.key()).collect();
        assert_eq!(keys, vec!["a", "b", "a"]);

        assert_eq!(record.headers_mut().remove("a"), Ok(2));
        assert_eq!(record.headers().len(), 1);
        assert_eq!(record.value_as_str().unwrap().unwrap(), "payload");
    }
}
