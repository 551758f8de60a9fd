use placeshare_core::db::{open_db, open_db_in_memory, TxScope};
use placeshare_core::{
    check_integrity, Coordinates, CoordinatorError, CreatePlaceRequest, EntityKind,
    FixedGeocoder, GeocodeError, Place, PlaceCoordinator, PlaceDraft, PlaceFilter, PlaceId,
    PlaceRepository, RepoError, RepoResult, SqlitePlaceRepository, SqliteUserRepository,
    TableGeocoder, User, UserFilter, UserId, UserRepository,
};
use rusqlite::Connection;
use std::cell::Cell;
use uuid::Uuid;

fn seed_user(conn: &Connection, email: &str) -> User {
    let repo = SqliteUserRepository::try_new(conn).unwrap();
    let mut user = User::new("Max", email, "secret1", "avatar.png");
    repo.save(&mut user, None).unwrap();
    user
}

fn empire_state_draft() -> PlaceDraft {
    PlaceDraft {
        title: "Empire State Building".to_string(),
        description: "One of the most famous sky scrapers in the world!".to_string(),
        address: "20 W 34th St, New York, NY 10001".to_string(),
        location: Coordinates::new(40.7484474, -73.9871516),
        image: "empire.jpg".to_string(),
    }
}

fn place_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM places;", [], |row| row.get(0))
        .unwrap()
}

fn reload_user(conn: &Connection, id: UserId) -> User {
    SqliteUserRepository::try_new(conn).unwrap().get(id).unwrap()
}

fn assert_consistent(conn: &Connection) {
    let report = check_integrity(conn).unwrap();
    assert!(report.is_consistent(), "violations: {:?}", report.violations);
}

fn install_user_update_failure(conn: &Connection) {
    conn.execute_batch(
        "CREATE TRIGGER fail_user_update BEFORE UPDATE ON users
         BEGIN
             SELECT RAISE(ABORT, 'injected user store failure');
         END;",
    )
    .unwrap();
}

/// Counts every call that reaches the user store.
struct CountingUsers<'conn> {
    inner: SqliteUserRepository<'conn>,
    calls: Cell<usize>,
}

impl UserRepository for CountingUsers<'_> {
    fn get(&self, id: UserId) -> RepoResult<User> {
        self.calls.set(self.calls.get() + 1);
        self.inner.get(id)
    }

    fn find_by_filter(&self, filter: &UserFilter) -> RepoResult<Vec<User>> {
        self.calls.set(self.calls.get() + 1);
        self.inner.find_by_filter(filter)
    }

    fn save(&self, user: &mut User, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.calls.set(self.calls.get() + 1);
        self.inner.save(user, tx)
    }

    fn delete(&self, user: &User, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.calls.set(self.calls.get() + 1);
        self.inner.delete(user, tx)
    }
}

/// Lets another writer bump the user row right after every load.
struct StaleUsers<'conn> {
    inner: SqliteUserRepository<'conn>,
    conn: &'conn Connection,
    interleave: Cell<bool>,
}

impl UserRepository for StaleUsers<'_> {
    fn get(&self, id: UserId) -> RepoResult<User> {
        let user = self.inner.get(id)?;
        if self.interleave.replace(false) {
            self.conn
                .execute(
                    "UPDATE users SET version = version + 1 WHERE id = ?1;",
                    [id.to_string()],
                )
                .unwrap();
        }
        Ok(user)
    }

    fn find_by_filter(&self, filter: &UserFilter) -> RepoResult<Vec<User>> {
        self.inner.find_by_filter(filter)
    }

    fn save(&self, user: &mut User, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.inner.save(user, tx)
    }

    fn delete(&self, user: &User, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.inner.delete(user, tx)
    }
}

/// Stages a stray link for `stray_owner` on every place save.
struct StrayLinkPlaces<'conn> {
    inner: SqlitePlaceRepository<'conn>,
    stray_owner: UserId,
}

impl PlaceRepository for StrayLinkPlaces<'_> {
    fn get(&self, id: PlaceId) -> RepoResult<Place> {
        self.inner.get(id)
    }

    fn find_by_filter(&self, filter: &PlaceFilter) -> RepoResult<Vec<Place>> {
        self.inner.find_by_filter(filter)
    }

    fn save(&self, place: &mut Place, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.inner.save(place, tx)?;
        if let Some(scope) = tx {
            scope.connection()?.execute(
                "INSERT INTO user_places (user_id, place_id, position) VALUES (?1, ?2, 0);",
                [self.stray_owner.to_string(), Uuid::new_v4().to_string()],
            )?;
        }
        Ok(())
    }

    fn delete(&self, place: &Place, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.inner.delete(place, tx)
    }
}

/// Deletes the place through another coordinator right after it is loaded.
struct RacingPlaces<'conn> {
    inner: SqlitePlaceRepository<'conn>,
    conn: &'conn Connection,
    race: Cell<bool>,
}

impl PlaceRepository for RacingPlaces<'_> {
    fn get(&self, id: PlaceId) -> RepoResult<Place> {
        let place = self.inner.get(id)?;
        if self.race.replace(false) {
            PlaceCoordinator::sqlite(self.conn)
                .unwrap()
                .delete_place_and_unlink(&id.to_string())
                .unwrap();
        }
        Ok(place)
    }

    fn find_by_filter(&self, filter: &PlaceFilter) -> RepoResult<Vec<Place>> {
        self.inner.find_by_filter(filter)
    }

    fn save(&self, place: &mut Place, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.inner.save(place, tx)
    }

    fn delete(&self, place: &Place, tx: Option<&TxScope<'_>>) -> RepoResult<()> {
        self.inner.delete(place, tx)
    }
}

#[test]
fn create_links_place_to_owner() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();

    let place = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();

    assert!(!place.id.is_nil());
    assert_eq!(place.creator, owner.id);
    assert_eq!(place.title, "Empire State Building");
    assert_eq!(reload_user(&conn, owner.id).places, vec![place.id]);
    assert_eq!(coordinator.places().get(place.id).unwrap(), place);
    assert_consistent(&conn);
}

#[test]
fn create_appends_in_creation_order() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
    let owner_id = owner.id.to_string();

    let first = coordinator
        .create_place_for_user(empire_state_draft(), &owner_id)
        .unwrap();
    let mut second_draft = empire_state_draft();
    second_draft.title = "Chrysler Building".to_string();
    let second = coordinator
        .create_place_for_user(second_draft, &owner_id)
        .unwrap();

    assert_eq!(reload_user(&conn, owner.id).places, vec![first.id, second.id]);
    let listed: Vec<_> = coordinator
        .places()
        .find_by_filter(&PlaceFilter::by_creator(owner.id))
        .unwrap()
        .into_iter()
        .map(|place| place.id)
        .collect();
    assert_eq!(listed, vec![first.id, second.id]);
    assert_consistent(&conn);
}

#[test]
fn create_for_missing_user_fails_without_side_effects() {
    let conn = open_db_in_memory().unwrap();
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
    let missing = Uuid::new_v4();

    let err = coordinator
        .create_place_for_user(empire_state_draft(), &missing.to_string())
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::UserNotFound(id) if id == missing));
    assert_eq!(err.status_code(), 404);
    assert_eq!(place_count(&conn), 0);
}

#[test]
fn create_with_malformed_creator_makes_no_store_calls() {
    let conn = open_db_in_memory().unwrap();
    let users = CountingUsers {
        inner: SqliteUserRepository::try_new(&conn).unwrap(),
        calls: Cell::new(0),
    };
    let coordinator =
        PlaceCoordinator::new(&conn, SqlitePlaceRepository::try_new(&conn).unwrap(), users);

    let err = coordinator
        .create_place_for_user(empire_state_draft(), "not-an-id-format")
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::InvalidIdentifier {
            entity: EntityKind::User,
            ref raw,
        } if raw == "not-an-id-format"
    ));
    assert_eq!(err.status_code(), 400);
    assert_eq!(coordinator.users().calls.get(), 0);
    assert_eq!(place_count(&conn), 0);
}

#[test]
fn create_rejects_invalid_draft_before_loading_user() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let users = CountingUsers {
        inner: SqliteUserRepository::try_new(&conn).unwrap(),
        calls: Cell::new(0),
    };
    let coordinator =
        PlaceCoordinator::new(&conn, SqlitePlaceRepository::try_new(&conn).unwrap(), users);

    let mut draft = empire_state_draft();
    draft.location = Coordinates::new(123.0, 0.0);
    let err = coordinator
        .create_place_for_user(draft, &owner.id.to_string())
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::Validation(_)));
    assert_eq!(coordinator.users().calls.get(), 0);
}

#[test]
fn user_store_failure_during_create_persists_nothing() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    install_user_update_failure(&conn);
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();

    let err = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::PersistenceFailure(_)));
    assert_eq!(err.status_code(), 500);
    assert!(err.is_retry_safe());
    assert_eq!(place_count(&conn), 0);
    assert!(reload_user(&conn, owner.id).places.is_empty());
    assert!(conn.is_autocommit());
    assert_consistent(&conn);
}

#[test]
fn commit_failure_during_create_persists_nothing() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let bystander = seed_user(&conn, "u2@test.com");
    let places = StrayLinkPlaces {
        inner: SqlitePlaceRepository::try_new(&conn).unwrap(),
        stray_owner: bystander.id,
    };
    let coordinator =
        PlaceCoordinator::new(&conn, places, SqliteUserRepository::try_new(&conn).unwrap());

    let err = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::PersistenceFailure(RepoError::Db(_))
    ));
    assert!(err.is_retry_safe());
    assert_eq!(place_count(&conn), 0);
    assert!(reload_user(&conn, owner.id).places.is_empty());
    assert!(reload_user(&conn, bystander.id).places.is_empty());
    assert!(conn.is_autocommit());
    assert_consistent(&conn);
}

#[test]
fn stale_owner_snapshot_aborts_with_persistence_failure() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let users = StaleUsers {
        inner: SqliteUserRepository::try_new(&conn).unwrap(),
        conn: &conn,
        interleave: Cell::new(true),
    };
    let coordinator =
        PlaceCoordinator::new(&conn, SqlitePlaceRepository::try_new(&conn).unwrap(), users);

    let err = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::PersistenceFailure(RepoError::Conflict {
            entity: EntityKind::User,
            ..
        })
    ));
    assert_eq!(place_count(&conn), 0);

    // Retrying after a conflict is safe and succeeds once nobody interleaves.
    let place = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();
    assert_eq!(reload_user(&conn, owner.id).places, vec![place.id]);
    assert_consistent(&conn);
}

#[test]
fn delete_removes_place_and_unlinks_owner() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
    let keep = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();
    let doomed = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();

    let deleted = coordinator
        .delete_place_and_unlink(&doomed.id.to_string())
        .unwrap();

    assert_eq!(deleted.id, doomed.id);
    assert!(matches!(
        coordinator.places().find_by_id(&doomed.id.to_string()),
        Err(RepoError::NotFound {
            entity: EntityKind::Place,
            ..
        })
    ));
    assert_eq!(reload_user(&conn, owner.id).places, vec![keep.id]);
    assert_consistent(&conn);
}

#[test]
fn second_delete_reports_place_not_found() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
    let place = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();
    let place_id = place.id.to_string();

    coordinator.delete_place_and_unlink(&place_id).unwrap();
    let err = coordinator.delete_place_and_unlink(&place_id).unwrap_err();

    assert!(matches!(err, CoordinatorError::PlaceNotFound(id) if id == place.id));
    assert!(!err.is_retry_safe());
}

#[test]
fn delete_racing_another_delete_reports_place_not_found() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let place = PlaceCoordinator::sqlite(&conn)
        .unwrap()
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();
    let places = RacingPlaces {
        inner: SqlitePlaceRepository::try_new(&conn).unwrap(),
        conn: &conn,
        race: Cell::new(true),
    };
    let coordinator =
        PlaceCoordinator::new(&conn, places, SqliteUserRepository::try_new(&conn).unwrap());

    let err = coordinator
        .delete_place_and_unlink(&place.id.to_string())
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::PlaceNotFound(id) if id == place.id));
    assert_eq!(err.status_code(), 404);
    assert_eq!(place_count(&conn), 0);
    assert!(reload_user(&conn, owner.id).places.is_empty());
    assert!(conn.is_autocommit());
    assert_consistent(&conn);
}

#[test]
fn delete_with_malformed_id_is_invalid_identifier() {
    let conn = open_db_in_memory().unwrap();
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();

    let err = coordinator.delete_place_and_unlink("p1").unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::InvalidIdentifier {
            entity: EntityKind::Place,
            ..
        }
    ));
}

#[test]
fn user_store_failure_during_delete_keeps_both_sides() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
    let place = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();
    install_user_update_failure(&conn);

    let err = coordinator
        .delete_place_and_unlink(&place.id.to_string())
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::PersistenceFailure(_)));
    assert_eq!(coordinator.places().get(place.id).unwrap(), place);
    assert_eq!(reload_user(&conn, owner.id).places, vec![place.id]);
    assert_consistent(&conn);
}

#[test]
fn delete_repairs_owner_list_that_lost_the_place() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
    let place = coordinator
        .create_place_for_user(empire_state_draft(), &owner.id.to_string())
        .unwrap();
    // Only reachable with key enforcement off, e.g. after a manual repair.
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         DELETE FROM user_places;
         PRAGMA foreign_keys = ON;",
    )
    .unwrap();

    coordinator
        .delete_place_and_unlink(&place.id.to_string())
        .unwrap();

    assert_eq!(place_count(&conn), 0);
    assert_consistent(&conn);
}

#[test]
fn create_at_address_geocodes_and_defaults_image() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let coordinator = PlaceCoordinator::sqlite(&conn)
        .unwrap()
        .with_default_image("default.jpg");
    let empire = Coordinates::new(40.7484474, -73.9871516);
    let geocoder = TableGeocoder::new().with_entry("20 W 34th St, New York, NY 10001", empire);

    let place = coordinator
        .create_place_at_address(
            &CreatePlaceRequest {
                title: "  Empire State Building ".to_string(),
                description: "One of the most famous sky scrapers in the world!".to_string(),
                address: "20 W 34th St, New York, NY 10001".to_string(),
                creator: owner.id.to_string(),
                image: None,
            },
            &geocoder,
        )
        .unwrap();

    assert_eq!(place.location, empire);
    assert_eq!(place.image, "default.jpg");
    assert_eq!(place.title, "Empire State Building");
    assert_eq!(reload_user(&conn, owner.id).places, vec![place.id]);
}

#[test]
fn geocode_failure_short_circuits_before_store_access() {
    let conn = open_db_in_memory().unwrap();
    let owner = seed_user(&conn, "u1@test.com");
    let users = CountingUsers {
        inner: SqliteUserRepository::try_new(&conn).unwrap(),
        calls: Cell::new(0),
    };
    let coordinator =
        PlaceCoordinator::new(&conn, SqlitePlaceRepository::try_new(&conn).unwrap(), users);

    let err = coordinator
        .create_place_at_address(
            &CreatePlaceRequest {
                title: "Nowhere".to_string(),
                description: "A place that cannot be found".to_string(),
                address: "1 Unknown Road".to_string(),
                creator: owner.id.to_string(),
                image: None,
            },
            &TableGeocoder::new(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::Geocode(GeocodeError::NoResults(_))
    ));
    assert_eq!(coordinator.users().calls.get(), 0);
    assert_eq!(place_count(&conn), 0);
}

#[test]
fn create_at_address_checks_creator_format_before_geocoding() {
    let conn = open_db_in_memory().unwrap();
    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
    let geocoder = FixedGeocoder::new(Coordinates::new(1.0, 2.0));

    let err = coordinator
        .create_place_at_address(
            &CreatePlaceRequest {
                title: "Somewhere".to_string(),
                description: "Somewhere with a long enough description".to_string(),
                address: "2 Known Road".to_string(),
                creator: "u1".to_string(),
                image: Some("custom.jpg".to_string()),
            },
            &geocoder,
        )
        .unwrap_err();

    assert!(matches!(err, CoordinatorError::InvalidIdentifier { .. }));
}

#[test]
fn concurrent_creates_for_one_user_never_drop_a_link() {
    const WRITERS: usize = 4;
    const ATTEMPTS: usize = 20;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("places.db");
    let owner = {
        let conn = open_db(&path).unwrap();
        seed_user(&conn, "u1@test.com")
    };
    let owner_id = owner.id.to_string();

    let created: Vec<Place> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let path = path.clone();
                let owner_id = owner_id.clone();
                scope.spawn(move || {
                    let conn = open_db(&path).unwrap();
                    let coordinator = PlaceCoordinator::sqlite(&conn).unwrap();
                    for _ in 0..ATTEMPTS {
                        match coordinator.create_place_for_user(empire_state_draft(), &owner_id)
                        {
                            Ok(place) => return place,
                            Err(err) if err.is_retry_safe() => continue,
                            Err(err) => panic!("unexpected error: {err}"),
                        }
                    }
                    panic!("writer did not succeed after {ATTEMPTS} attempts");
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let conn = open_db(&path).unwrap();
    let stored = reload_user(&conn, owner.id);
    assert_eq!(stored.places.len(), WRITERS);
    for place in &created {
        assert!(stored.owns_place(place.id));
    }
    assert_eq!(place_count(&conn), WRITERS as i64);
    assert_consistent(&conn);
}
