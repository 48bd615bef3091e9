use std::sync::{Arc, Barrier};
use std::thread;
use uuid::Uuid;
use voteable_core::db::open_db;
use voteable_core::{
    AncestorLink, EntityKind, MemoryVoteStore, SqliteVoteStore, VoteConfig, VoteError,
    VoteRequest, VoteService, VoteValue, VoteWeights, Voteable,
};

fn kind(name: &str) -> EntityKind {
    EntityKind::new(name).unwrap()
}

fn forum_config() -> Arc<VoteConfig> {
    Arc::new(
        VoteConfig::builder()
            .register(kind("comment"), kind("comment"), VoteWeights::new(1, -1))
            .register(kind("comment"), kind("post"), VoteWeights::new(1, -1))
            .relate(kind("comment"), kind("post"), AncestorLink::foreign_key("post_id"))
            .build()
            .unwrap(),
    )
}

#[test]
fn racing_up_and_down_by_same_voter_leave_one_vote_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let config = forum_config();

    let post = Voteable::new(kind("post"));
    let comment = Voteable::new(kind("comment")).link("post_id", post.id).unwrap();
    {
        let conn = open_db(&path).unwrap();
        let service = VoteService::new(SqliteVoteStore::new(&conn), Arc::clone(&config));
        service.create_voteable(&post).unwrap();
        service.create_voteable(&comment).unwrap();
    }

    let voter = Uuid::new_v4();
    let barrier = Barrier::new(2);
    let results: Vec<Result<_, VoteError>> = thread::scope(|scope| {
        let handles: Vec<_> = [VoteValue::Up, VoteValue::Down]
            .into_iter()
            .map(|value| {
                let (path, config, barrier, comment) = (&path, &config, &barrier, &comment);
                scope.spawn(move || {
                    let conn = open_db(path).unwrap();
                    let service = VoteService::new(SqliteVoteStore::new(&conn), Arc::clone(config));
                    barrier.wait();
                    service.vote_on(comment, &VoteRequest::new(voter, value))
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(VoteError::GuardMismatch { .. }))));

    let conn = open_db(&path).unwrap();
    let service = VoteService::new(SqliteVoteStore::new(&conn), config);
    let stored = service.voteable(&comment.kind, comment.id).unwrap().unwrap();
    assert_eq!(stored.votes.vote_count, 1);
    assert_eq!(stored.votes.up_count + stored.votes.down_count, 1);
    assert_eq!(stored.vote_side(voter), Some(winners[0].value));

    let post_votes = service.voteable(&post.kind, post.id).unwrap().unwrap().votes;
    assert_eq!(post_votes.vote_count, 1);
}

#[test]
fn racing_identical_votes_apply_exactly_once_in_memory_store() {
    let service = VoteService::new(Arc::new(MemoryVoteStore::new()), forum_config());
    let post = Voteable::new(kind("post"));
    let comment = Voteable::new(kind("comment")).link("post_id", post.id).unwrap();
    service.create_voteable(&post).unwrap();
    service.create_voteable(&comment).unwrap();

    let voter = Uuid::new_v4();
    let threads = 8;
    let barrier = Barrier::new(threads);
    let successes = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    service.vote_on(&comment, &VoteRequest::up(voter)).is_ok()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(successes, 1);
    let post_votes = service.voteable(&post.kind, post.id).unwrap().unwrap().votes;
    assert_eq!((post_votes.up_count, post_votes.vote_point), (1, 1));
}

#[test]
fn distinct_voters_all_land_under_contention() {
    let service = VoteService::new(Arc::new(MemoryVoteStore::new()), forum_config());
    let post = Voteable::new(kind("post"));
    let comment = Voteable::new(kind("comment")).link("post_id", post.id).unwrap();
    service.create_voteable(&post).unwrap();
    service.create_voteable(&comment).unwrap();

    thread::scope(|scope| {
        for index in 0..16 {
            let service = &service;
            let comment = &comment;
            scope.spawn(move || {
                let value = if index % 4 == 0 { VoteValue::Down } else { VoteValue::Up };
                service
                    .vote(&comment.kind, comment.id, &VoteRequest::new(Uuid::new_v4(), value))
                    .unwrap();
            });
        }
    });

    let stored = service.voteable(&comment.kind, comment.id).unwrap().unwrap().votes;
    assert_eq!((stored.up_count, stored.down_count, stored.vote_count), (12, 4, 16));
    assert_eq!(stored.vote_point, 8);
    assert_eq!(stored.up_voter_ids.len(), 12);

    let post_votes = service.voteable(&post.kind, post.id).unwrap().unwrap().votes;
    assert_eq!(post_votes.vote_point, 8);
    assert_eq!(post_votes.vote_count, 16);
}
