use crate::log::{Entry, LogChangeReason, RaftLog};
use crate::proto::{
    AppendEntriesRequest, AppendEntriesResponse, Entry as ProtoEntry, VoteRequest, VoteResponse,
};
use crate::raft::state::{is_log_up_to_date, RaftContext};

/// Decide a RequestVote against the local context and log.
///
/// The caller has already moved to the request's term if it was newer.
pub fn handle_request_vote(
    ctx: &mut RaftContext,
    log: &dyn RaftLog,
    req: &VoteRequest,
    my_id: u64,
) -> VoteResponse {
    let vote_granted = if req.term < ctx.current_term {
        false
    } else if ctx.voted_for.is_some() && ctx.voted_for != Some(req.candidate_id) {
        // Already voted for someone else in this term
        false
    } else if !is_log_up_to_date(
        log.last_index(),
        log.last_term(),
        req.last_log_index,
        req.last_log_term,
    ) {
        false
    } else {
        ctx.voted_for = Some(req.candidate_id);
        true
    };

    tracing::debug!(
        node_id = my_id,
        candidate = req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: ctx.current_term,
        vote_granted,
    }
}

/// Apply an AppendEntries from the leader to a follower's log.
///
/// The caller has already moved to the request's term if it was newer. On
/// success `match_index` is the last index known to match the leader; on
/// rejection it hints where the leader should resume.
pub fn handle_append_entries(
    ctx: &mut RaftContext,
    log: &dyn RaftLog,
    req: &AppendEntriesRequest,
    my_id: u64,
) -> AppendEntriesResponse {
    let reject = |ctx: &RaftContext, match_index: u64| AppendEntriesResponse {
        term: ctx.current_term,
        success: false,
        match_index,
    };

    if req.term < ctx.current_term {
        return reject(ctx, log.last_index());
    }
    ctx.leader_id = Some(req.leader_id);

    match log.term_at(req.prev_log_index) {
        None => {
            tracing::debug!(
                node_id = my_id,
                prev_log_index = req.prev_log_index,
                last_index = log.last_index(),
                "Missing entry at prev_log_index"
            );
            return reject(ctx, log.last_index());
        }
        Some(term) if term != req.prev_log_term => {
            tracing::debug!(
                node_id = my_id,
                prev_log_index = req.prev_log_index,
                expected = req.prev_log_term,
                found = term,
                "Term mismatch at prev_log_index"
            );
            log.truncate_from(req.prev_log_index);
            let hint = log.last_index().min(req.prev_log_index.saturating_sub(1));
            return reject(ctx, hint);
        }
        Some(_) => {}
    }

    let mut appended = 0usize;
    for (offset, proto) in req.entries.iter().enumerate() {
        let index = req.prev_log_index + 1 + offset as u64;
        match log.term_at(index) {
            Some(term) if term == proto.term => continue,
            Some(_) => log.truncate_from(index),
            None => {}
        }
        log.append(proto_to_entry(proto), LogChangeReason::Replication);
        appended += 1;
    }

    let last_new_index = req.prev_log_index + req.entries.len() as u64;
    if appended > 0 {
        tracing::debug!(
            node_id = my_id,
            entries_appended = appended,
            new_last_index = last_new_index,
            "Appended entries"
        );
    }

    if req.leader_commit > log.commit_index() {
        log.commit(req.leader_commit.min(last_new_index));
    }

    AppendEntriesResponse {
        term: ctx.current_term,
        success: true,
        match_index: last_new_index,
    }
}

/// Convert protobuf Entry to log Entry
pub fn proto_to_entry(proto: &ProtoEntry) -> Entry {
    Entry {
        term: proto.term,
        leader_id: proto.leader_id,
        index: proto.index,
        namespace: proto.namespace.clone(),
        payload: proto
            .payload
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// Convert log Entry to protobuf Entry
pub fn entry_to_proto(entry: &Entry) -> ProtoEntry {
    ProtoEntry {
        term: entry.term,
        leader_id: entry.leader_id,
        index: entry.index,
        namespace: entry.namespace.clone(),
        payload: entry
            .payload
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}
