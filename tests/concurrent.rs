use std::sync::{Arc, Barrier};
use std::thread;

use rand::seq::SliceRandom;
use rand::thread_rng;

use tessera::{
    Database, Result, SessionKind, TesseraError, TransactionOptions, TransactionType, Value,
    ValueType,
};

const WRITER_THREADS: usize = 4;
const COMMITS_PER_THREAD: usize = 25;

fn options() -> TransactionOptions {
    TransactionOptions::default()
}

#[test]
fn conflicting_data_writers_fail_optimistically() -> Result<()> {
    let db = Database::open("conflicts")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        let types = tx.types()?;
        let person = types.put_entity_type("person")?;
        types.put_attribute_type("name", ValueType::String)?;
        person.has(&types.get_type("name")?.expect("declared"))?;
        tx.commit()?;
    }
    let (entity, attribute) = {
        let session = db.session(SessionKind::Data);
        let tx = session.transaction(TransactionType::Write, options())?;
        let types = tx.types()?;
        let person = types.get_type("person")?.expect("committed");
        let name = types.get_type("name")?.expect("committed");
        let data = tx.data()?;
        let entity = data.create_entity(person.vertex())?;
        let attribute = data.create_attribute(name.vertex(), Value::String("ada".into()))?;
        data.put_has(entity, attribute)?;
        tx.commit()?;
        (entity, attribute)
    };

    // Two writers buffer the same key; the slower commit must fail.
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            let session = db.session(SessionKind::Data);
            let tx = session.transaction(TransactionType::Write, options())?;
            barrier.wait();
            tx.data()?.put_has(entity, attribute)?;
            tx.commit()
        }));
    }
    let outcomes: Vec<Result<()>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("writer thread panicked"))
        .collect();
    let failures: Vec<&TesseraError> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
    assert_eq!(outcomes.len() - failures.len(), 1, "exactly one commit wins");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), "STORAGE_FAILURE");
    Ok(())
}

#[test]
fn schema_commit_proceeds_while_data_writers_run() -> Result<()> {
    let db = Database::open("drain")?;
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        tx.types()?.put_entity_type("person")?;
        tx.commit()?;
    }

    let barrier = Arc::new(Barrier::new(3));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            let session = db.session(SessionKind::Data);
            let tx = session.transaction(TransactionType::Write, options())?;
            barrier.wait();
            let person = tx.types()?.get_type("person")?.expect("committed");
            tx.data()?.create_entity(person.vertex())?;
            tx.commit()
        }));
    }
    let schema_writer = {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> Result<()> {
            let session = db.session(SessionKind::Schema);
            let tx = session.transaction(TransactionType::Write, options())?;
            tx.types()?.put_entity_type("vehicle")?;
            barrier.wait();
            tx.commit()
        })
    };
    for handle in handles {
        handle.join().expect("data writer panicked")?;
    }
    schema_writer.join().expect("schema writer panicked")?;

    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Read, options())?;
    assert!(tx.types()?.get_type("vehicle")?.is_some());
    tx.close();
    Ok(())
}

#[test]
fn concurrent_schema_writers_serialise_or_conflict() -> Result<()> {
    let db = Database::open("schema_race")?;
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            let session = db.session(SessionKind::Schema);
            let tx = session.transaction(TransactionType::Write, options())?;
            tx.types()?.put_entity_type("vehicle")?;
            barrier.wait();
            tx.commit()
        }));
    }
    let outcomes: Vec<Result<()>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("schema writer panicked"))
        .collect();
    let successes = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(successes, 1, "both writers declared the same label");
    for failure in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        assert_eq!(failure.code(), "STORAGE_FAILURE");
    }

    let session = db.session(SessionKind::Schema);
    let tx = session.transaction(TransactionType::Read, options())?;
    assert!(tx.types()?.get_type("vehicle")?.is_some());
    tx.close();
    Ok(())
}

#[test]
fn concurrent_entity_creation_is_conflict_free() -> Result<()> {
    let db = Database::open("parallel_inserts")?;
    let type_labels = ["person", "company", "city"];
    {
        let session = db.session(SessionKind::Schema);
        let tx = session.transaction(TransactionType::Write, options())?;
        for label in type_labels {
            tx.types()?.put_entity_type(label)?;
        }
        tx.commit()?;
    }

    let barrier = Arc::new(Barrier::new(WRITER_THREADS));
    let mut handles = Vec::new();
    for _ in 0..WRITER_THREADS {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<usize> {
            barrier.wait();
            let session = db.session(SessionKind::Data);
            let mut committed = 0;
            let mut rng = thread_rng();
            for _ in 0..COMMITS_PER_THREAD {
                let label = *type_labels.choose(&mut rng).expect("nonempty");
                let tx = session.transaction(TransactionType::Write, options())?;
                let type_ = tx.types()?.get_type(label)?.expect("committed");
                tx.data()?.create_entity(type_.vertex())?;
                tx.commit()?;
                committed += 1;
            }
            Ok(committed)
        }));
    }
    let mut total = 0;
    for handle in handles {
        total += handle.join().expect("writer thread panicked")?;
    }
    assert_eq!(total, WRITER_THREADS * COMMITS_PER_THREAD);

    let session = db.session(SessionKind::Data);
    let tx = session.transaction(TransactionType::Read, options())?;
    let mut counted = 0;
    for label in type_labels {
        let type_ = tx.types()?.get_type(label)?.expect("committed");
        for instance in type_.instances() {
            instance?;
            counted += 1;
        }
    }
    assert_eq!(counted, total);
    tx.close();
    Ok(())
}
