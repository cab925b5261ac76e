use crate::common::{decode, encode, ModuleKind, JOURNAL_EMPTY_PAYLOAD, JOURNAL_FIELD_SEPARATOR};
use crate::errors::{ErrorKind, OstxError, OstxResult};
use crate::resource::ResourceId;

/// State of a resource before an eager effect, used by undo to compensate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreState {
    /// The resource did not exist
    Absent,
    /// Descriptor offset
    Offset(u64),
    /// Previous contents
    Bytes(Vec<u8>),
}

/// One entry of a module's private log.
///
/// A record without a pre-state is a deferred effect: nothing happened yet and `apply`
/// performs it. A record with a pre-state describes an effect that already happened
/// and that `undo` reverts.
#[derive(Debug, Clone)]
pub struct LogRecord<P> {
    resource: ResourceId,
    pre_state: Option<PreState>,
    payload: P,
}

impl<P> LogRecord<P> {
    pub fn deferred(resource: ResourceId, payload: P) -> Self {
        LogRecord {
            resource,
            pre_state: None,
            payload,
        }
    }

    pub fn eager(resource: ResourceId, pre_state: PreState, payload: P) -> Self {
        LogRecord {
            resource,
            pre_state: Some(pre_state),
            payload,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn pre_state(&self) -> Option<&PreState> {
        self.pre_state.as_ref()
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn is_deferred(&self) -> bool {
        self.pre_state.is_none()
    }
}

/// Ordered, per-module record of what a transaction did.
///
/// Both [`apply_all`](Self::apply_all) and [`undo_all`](Self::undo_all) drain the log, so
/// each record is acted on at most once and a second call is a no-op.
///
/// # Examples
///
/// ```
/// use ostx::resource::ResourceId;
/// use ostx::transaction::{DeferredLog, LogRecord};
///
/// let mut log = DeferredLog::new();
/// log.append(LogRecord::deferred(ResourceId::named("out"), b"abc".to_vec()));
///
/// let mut written = Vec::new();
/// log.apply_all(|record| {
///     written.extend_from_slice(record.payload());
///     Ok(())
/// }).unwrap();
///
/// assert_eq!(written, b"abc");
/// assert!(log.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct DeferredLog<P> {
    records: Vec<LogRecord<P>>,
}

impl<P> Default for DeferredLog<P> {
    fn default() -> Self {
        DeferredLog {
            records: Vec::new(),
        }
    }
}

impl<P> DeferredLog<P> {
    pub fn new() -> Self {
        DeferredLog::default()
    }

    pub fn append(&mut self, record: LogRecord<P>) {
        log::trace!(
            "Appending {} record #{} for {}",
            if record.is_deferred() { "deferred" } else { "eager" },
            self.records.len(),
            record.resource()
        );
        self.records.push(record);
    }

    /// Runs `f` over every record in append order.
    ///
    /// Stops at the first failure. Records after the failing one are dropped and never
    /// performed, so a retry of apply cannot repeat an effect.
    pub fn apply_all<F>(&mut self, mut f: F) -> OstxResult<usize>
    where
        F: FnMut(&LogRecord<P>) -> OstxResult<()>,
    {
        let records = std::mem::take(&mut self.records);
        let total = records.len();
        for (index, record) in records.iter().enumerate() {
            if let Err(e) = f(record) {
                log::error!(
                    "Applying record #{} for {} failed, dropping {} remaining: {}",
                    index,
                    record.resource(),
                    total - index - 1,
                    e
                );
                return Err(e);
            }
        }
        Ok(total)
    }

    /// Runs `f` over every record, newest first.
    ///
    /// A failing compensation does not stop the others. The first error is returned after
    /// every record has been visited.
    pub fn undo_all<F>(&mut self, mut f: F) -> OstxResult<usize>
    where
        F: FnMut(&LogRecord<P>) -> OstxResult<()>,
    {
        let records = std::mem::take(&mut self.records);
        let total = records.len();
        let mut first_error = None;
        for record in records.iter().rev() {
            if let Err(e) = f(record) {
                log::error!("Undoing record for {} failed: {}", record.resource(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Drops every record without acting on it.
    pub fn discard(&mut self) -> usize {
        let n = self.records.len();
        self.records.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord<P>> {
        self.records.iter()
    }

    /// Renders every record as a journal line. `describe` names the operation and the bytes
    /// it carries, if any.
    pub fn journal<F>(&self, kind: ModuleKind, describe: F) -> Vec<String>
    where
        F: Fn(&P) -> (&'static str, Option<&[u8]>),
    {
        self.records
            .iter()
            .map(|record| {
                let (op, bytes) = describe(record.payload());
                JournalLine::new(kind, op, record.resource(), bytes.unwrap_or_default()).render()
            })
            .collect()
    }
}

/// Text-safe view of one log record: `<module> <op> <resource> <payload>`.
///
/// The payload is base64 text, or `-` when empty. The resource is the only field that may
/// contain the separator, so parsing splits module and op from the left and the payload
/// from the right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalLine {
    module: String,
    op: String,
    resource: String,
    payload: Vec<u8>,
}

impl JournalLine {
    pub fn new(kind: ModuleKind, op: &str, resource: &ResourceId, payload: &[u8]) -> Self {
        JournalLine {
            module: kind.to_string(),
            op: op.to_string(),
            resource: resource.to_string(),
            payload: payload.to_vec(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn render(&self) -> String {
        let payload = if self.payload.is_empty() {
            JOURNAL_EMPTY_PAYLOAD.to_string()
        } else {
            encode(&self.payload)
        };
        format!(
            "{module}{sep}{op}{sep}{resource}{sep}{payload}",
            module = self.module,
            op = self.op,
            resource = self.resource,
            payload = payload,
            sep = JOURNAL_FIELD_SEPARATOR
        )
    }

    /// Parses a rendered line.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::DecodingError`] if a field is missing or the payload is not valid base64.
    pub fn parse(line: &str) -> OstxResult<Self> {
        let malformed = || {
            OstxError::new(
                &format!("Malformed journal line: {:?}", line),
                ErrorKind::DecodingError,
            )
        };

        let mut head = line.splitn(3, JOURNAL_FIELD_SEPARATOR);
        let module = head.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let op = head.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let rest = head.next().ok_or_else(malformed)?;
        let (resource, payload) = rest
            .rsplit_once(JOURNAL_FIELD_SEPARATOR)
            .ok_or_else(malformed)?;

        let payload = if payload == JOURNAL_EMPTY_PAYLOAD {
            Vec::new()
        } else {
            decode(payload)?
        };

        Ok(JournalLine {
            module: module.to_string(),
            op: op.to_string(),
            resource: resource.to_string(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(n: &str) -> ResourceId {
        ResourceId::named(n)
    }

    #[test]
    fn test_apply_runs_in_order_once() {
        let mut log = DeferredLog::new();
        log.append(LogRecord::deferred(named("a"), 1));
        log.append(LogRecord::deferred(named("b"), 2));
        log.append(LogRecord::deferred(named("c"), 3));

        let mut seen = Vec::new();
        assert_eq!(
            log.apply_all(|r| {
                seen.push(*r.payload());
                Ok(())
            })
            .unwrap(),
            3
        );
        assert_eq!(seen, vec![1, 2, 3]);

        assert_eq!(log.apply_all(|_| panic!("applied twice")).unwrap(), 0);
    }

    #[test]
    fn test_apply_failure_drops_remaining() {
        let mut log = DeferredLog::new();
        for i in 0..4 {
            log.append(LogRecord::deferred(named("a"), i));
        }

        let mut seen = Vec::new();
        let err = log
            .apply_all(|r| {
                if *r.payload() == 2 {
                    return Err(OstxError::new("boom", ErrorKind::IOError));
                }
                seen.push(*r.payload());
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::IOError);
        assert_eq!(seen, vec![0, 1]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_undo_runs_newest_first() {
        let mut log = DeferredLog::new();
        log.append(LogRecord::eager(named("a"), PreState::Offset(0), "first"));
        log.append(LogRecord::deferred(named("a"), "second"));

        let mut seen = Vec::new();
        log.undo_all(|r| {
            seen.push(*r.payload());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec!["second", "first"]);
    }

    #[test]
    fn test_undo_is_idempotent_under_faults() {
        let mut log = DeferredLog::new();
        log.append(LogRecord::eager(named("a"), PreState::Absent, 1));
        log.append(LogRecord::eager(named("b"), PreState::Absent, 2));

        let mut compensated = Vec::new();
        let result = log.undo_all(|r| {
            if *r.payload() == 2 {
                return Err(OstxError::new("injected", ErrorKind::IOError));
            }
            compensated.push(*r.payload());
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(compensated, vec![1]);

        let second = log.undo_all(|r| {
            compensated.push(*r.payload());
            Ok(())
        });
        assert_eq!(second.unwrap(), 0);
        assert_eq!(compensated, vec![1]);
    }

    #[test]
    fn test_discard() {
        let mut log = DeferredLog::new();
        log.append(LogRecord::deferred(named("a"), ()));
        assert_eq!(log.discard(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_record_kinds() {
        let deferred = LogRecord::deferred(named("a"), ());
        let eager = LogRecord::eager(named("a"), PreState::Offset(4), ());
        assert!(deferred.is_deferred());
        assert!(!eager.is_deferred());
        assert_eq!(eager.pre_state(), Some(&PreState::Offset(4)));
    }

    #[test]
    fn test_journal_lines() {
        let mut log = DeferredLog::new();
        log.append(LogRecord::deferred(ResourceId::PipeWrite(1), b"hello".to_vec()));
        log.append(LogRecord::deferred(ResourceId::PipeWrite(1), Vec::new()));

        let lines = log.journal(ModuleKind::Pipe, |p| ("write", Some(p.as_slice())));
        assert_eq!(lines[0], "pipe write pipe:1:w aGVsbG8=");
        assert_eq!(lines[1], "pipe write pipe:1:w -");
    }

    #[test]
    fn test_journal_line_parse_with_spaces_in_resource() {
        let line = JournalLine::new(
            ModuleKind::File,
            "write",
            &ResourceId::path("/tmp/my file.txt"),
            b"data",
        );
        let parsed = JournalLine::parse(&line.render()).unwrap();
        assert_eq!(parsed, line);
        assert_eq!(parsed.resource(), "path:/tmp/my file.txt");
        assert_eq!(parsed.payload(), b"data");
    }

    #[test]
    fn test_journal_line_parse_rejects_bad_payload() {
        let err = JournalLine::parse("pipe write pipe:1:w aGV*bG8=").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DecodingError);
        assert!(JournalLine::parse("pipe").is_err());
        assert!(JournalLine::parse("pipe write").is_err());
    }
}
