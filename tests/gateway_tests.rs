
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use matrix_broker::client::BrokerClient;
use matrix_broker::config::{SchedulerConfig, VerificationConfig, WorkerConfig};
use matrix_broker::protocol::{
    ClientMessage, ComputeTask, JobComplete, Role, ServerMessage, SubmitJobRequest, SystemStatus,
    Welcome, PROTOCOL_VERSION,
};
use matrix_broker::scheduler::verify::multiply_reference;
use matrix_broker::scheduler::Dimensions;
use matrix_broker::worker::{WorkerAgent, WorkerExit};
use test_harness::{compute, identity, local_addr, recv_within, sequential, TestBroker};

/// Read frames until a compute task arrives.
async fn next_task(worker: &mut BrokerClient) -> Option<ComputeTask> {
    loop {
        match recv_within(worker).await.unwrap()? {
            ServerMessage::ComputeTask(task) => return Some(task),
            _ => continue,
        }
    }
}

async fn wait_for_completion(client: &mut BrokerClient, job_id: &str) -> JobComplete {
    loop {
        match recv_within(client).await.unwrap() {
            Some(ServerMessage::JobComplete(done)) if done.job_id == job_id => return done,
            Some(ServerMessage::JobError(e)) => panic!("job failed: {}", e.message),
            Some(_) => continue,
            None => panic!("broker closed the connection"),
        }
    }
}

async fn query_status(client: &mut BrokerClient) -> SystemStatus {
    client.send(&ClientMessage::StatusQuery).await.unwrap();
    loop {
        if let Some(ServerMessage::StatusReply(status)) = recv_within(client).await.unwrap() {
            return status;
        }
    }
}

async fn raw_connection(broker: &TestBroker) -> Framed<TcpStream, LinesCodec> {
    let stream = TcpStream::connect(broker.addr()).await.unwrap();
    Framed::new(stream, LinesCodec::new())
}

async fn raw_recv(framed: &mut Framed<TcpStream, LinesCodec>) -> Option<ServerMessage> {
    let line = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("timed out waiting for a frame")?
        .unwrap();
    Some(serde_json::from_str(&line).unwrap())
}

#[tokio::test]
async fn test_job_round_trip_over_tcp() {
    let broker = TestBroker::start(
        SchedulerConfig::default().with_verification(VerificationConfig::enabled(1024)),
    )
    .await;

    let mut w1 = broker.connect(Role::Worker).await;
    let mut w2 = broker.connect(Role::Worker).await;
    let mut client = broker.connect(Role::Client).await;

    let a = sequential(4, 4);
    let b = identity(4);
    client
        .send(&ClientMessage::SubmitJob(
            SubmitJobRequest::new("tcp", 4, 4, 4).with_operands(a.clone(), b),
        ))
        .await
        .unwrap();

    for worker in [&mut w1, &mut w2] {
        let task = next_task(worker).await.unwrap();
        assert_eq!(task.row_count, 2);
        worker
            .send(&ClientMessage::ChunkResult(compute(&task)))
            .await
            .unwrap();
    }

    let done = wait_for_completion(&mut client, "tcp").await;
    assert_eq!(done.result, a);
    assert_eq!(done.workers_used, 2);
    assert_eq!(done.chunks_count, 2);
    assert_eq!(done.verified, Some(true));

    let status = query_status(&mut client).await;
    assert_eq!(
        status,
        SystemStatus {
            active_workers: 2,
            pending_queue_length: 0,
            completed_job_count: 1,
        }
    );
    assert_eq!(broker.stats.recent_jobs(10).len(), 1);

    broker.stop().await;
}

#[tokio::test]
async fn test_clients_are_never_given_work() {
    let broker = TestBroker::start(SchedulerConfig::default()).await;
    let mut client = broker.connect(Role::Client).await;

    client
        .send(&ClientMessage::SubmitJob(SubmitJobRequest::new("lonely", 2, 2, 2)))
        .await
        .unwrap();

    match recv_within(&mut client).await.unwrap() {
        Some(ServerMessage::JobError(e)) => {
            assert_eq!(e.job_id, "lonely");
            assert!(e.message.contains("No available workers"), "{}", e.message);
        }
        other => panic!("expected job_error, got {other:?}"),
    }
    assert_eq!(query_status(&mut client).await.active_workers, 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_worker_disconnect_is_recovered() {
    let broker = TestBroker::start(SchedulerConfig::default()).await;

    let mut quitter = broker.connect(Role::Worker).await;
    let mut survivor = broker.connect(Role::Worker).await;
    let mut client = broker.connect(Role::Client).await;

    let a = sequential(4, 3);
    let b = sequential(3, 2);
    client
        .send(&ClientMessage::SubmitJob(
            SubmitJobRequest::new("bumpy", 4, 3, 2).with_operands(a.clone(), b.clone()),
        ))
        .await
        .unwrap();

    let abandoned = next_task(&mut quitter).await.unwrap();
    drop(quitter);

    let serve = tokio::spawn(async move {
        let mut served = Vec::new();
        while let Some(task) = next_task(&mut survivor).await {
            served.push(task.chunk_id);
            survivor
                .send(&ClientMessage::ChunkResult(compute(&task)))
                .await
                .unwrap();
            if served.len() == 2 {
                break;
            }
        }
        served
    });

    let done = wait_for_completion(&mut client, "bumpy").await;
    let served = serve.await.unwrap();
    assert!(served.contains(&abandoned.chunk_id));

    let dims = Dimensions {
        rows_a: 4,
        cols_a: 3,
        cols_b: 2,
    };
    assert_eq!(done.result, multiply_reference(&a, &b, dims).unwrap());

    let status = query_status(&mut client).await;
    assert_eq!(status.active_workers, 1);
    assert_eq!(status.completed_job_count, 1);

    broker.stop().await;
}

#[tokio::test]
async fn test_oversized_job_is_rejected_and_broker_survives() {
    let broker = TestBroker::start(SchedulerConfig::default()).await;
    let _worker = broker.connect(Role::Worker).await;
    let mut client = broker.connect(Role::Client).await;

    let huge = 1_i64 << 33;
    client
        .send(&ClientMessage::SubmitJob(SubmitJobRequest::new(
            "huge", huge, huge, 1,
        )))
        .await
        .unwrap();

    match recv_within(&mut client).await.unwrap() {
        Some(ServerMessage::JobError(e)) => {
            assert_eq!(e.job_id, "huge");
            assert!(e.message.contains("cell limit"), "{}", e.message);
        }
        other => panic!("expected job_error, got {other:?}"),
    }

    let status = query_status(&mut client).await;
    assert_eq!(status.active_workers, 1);
    assert_eq!(status.pending_queue_length, 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_heartbeat_is_acknowledged() {
    let broker = TestBroker::start(SchedulerConfig::default()).await;
    let mut worker = broker.connect(Role::Worker).await;

    worker.send(&ClientMessage::Heartbeat).await.unwrap();
    match recv_within(&mut worker).await.unwrap() {
        Some(ServerMessage::HeartbeatAck(_)) => {}
        other => panic!("expected heartbeat_ack, got {other:?}"),
    }

    broker.stop().await;
}

#[tokio::test]
async fn test_version_mismatch_closes_connection() {
    let broker = TestBroker::start(SchedulerConfig::default()).await;
    let mut raw = raw_connection(&broker).await;

    raw.send(r#"{"type":"hello","version":99,"role":"worker"}"#.to_string())
        .await
        .unwrap();

    match raw_recv(&mut raw).await {
        Some(ServerMessage::ProtocolError(e)) => {
            assert!(e.message.contains("version"), "{}", e.message)
        }
        other => panic!("expected protocol_error, got {other:?}"),
    }
    assert!(raw_recv(&mut raw).await.is_none());

    let mut client = broker.connect(Role::Client).await;
    assert_eq!(query_status(&mut client).await.active_workers, 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let broker = TestBroker::start(SchedulerConfig::default()).await;
    let mut raw = raw_connection(&broker).await;

    raw.send("this is not json".to_string()).await.unwrap();
    assert!(matches!(
        raw_recv(&mut raw).await,
        Some(ServerMessage::ProtocolError(_))
    ));

    raw.send(r#"{"type":"status_query"}"#.to_string())
        .await
        .unwrap();
    assert!(matches!(
        raw_recv(&mut raw).await,
        Some(ServerMessage::StatusReply(_))
    ));

    broker.stop().await;
}

#[tokio::test]
async fn test_worker_agents_complete_job() {
    let broker = TestBroker::start(SchedulerConfig::default()).await;
    let shutdown = CancellationToken::new();

    let agents: Vec<_> = (0..2)
        .map(|_| {
            let config = WorkerConfig::new(broker.addr())
                .with_heartbeat_interval_ms(50)
                .with_max_tasks(1);
            tokio::spawn(WorkerAgent::new(config).run(shutdown.clone()))
        })
        .collect();

    let mut client = broker.connect(Role::Client).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while query_status(&mut client).await.active_workers < 2 {
        assert!(tokio::time::Instant::now() < deadline, "workers never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let a = sequential(4, 4);
    client
        .send(&ClientMessage::SubmitJob(
            SubmitJobRequest::new("agents", 4, 4, 4).with_operands(a.clone(), identity(4)),
        ))
        .await
        .unwrap();
    let done = wait_for_completion(&mut client, "agents").await;
    assert_eq!(done.result, a);
    assert_eq!(done.workers_used, 2);

    for agent in agents {
        let report = agent.await.unwrap().unwrap();
        assert_eq!(report.tasks_completed, 1);
        assert_eq!(report.exit, WorkerExit::TaskLimit);
    }

    shutdown.cancel();
    broker.stop().await;
}

#[tokio::test]
async fn test_worker_agent_leaves_after_failed_task() {
    // Stand-in broker that hands out one task whose A slice is too short
    let listener = TcpListener::bind(local_addr()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let agent = tokio::spawn(WorkerAgent::new(WorkerConfig::new(addr)).run(shutdown.clone()));

    let (stream, _) = listener.accept().await.unwrap();
    let mut raw = Framed::new(stream, LinesCodec::new());
    let hello = raw.next().await.unwrap().unwrap();
    assert!(matches!(
        serde_json::from_str::<ClientMessage>(&hello).unwrap(),
        ClientMessage::Hello {
            role: Role::Worker,
            ..
        }
    ));

    let welcome = ServerMessage::Welcome(Welcome {
        connection_id: uuid::Uuid::new_v4(),
        version: PROTOCOL_VERSION,
    });
    let task = ServerMessage::ComputeTask(ComputeTask {
        job_id: "broken".into(),
        chunk_id: 0,
        row_offset: 0,
        row_count: 2,
        cols_a: 2,
        cols_b: 2,
        matrix_a_chunk: vec![1.0; 3],
        matrix_b_full: vec![1.0; 4],
    });
    for message in [welcome, task] {
        raw.send(serde_json::to_string(&message).unwrap())
            .await
            .unwrap();
    }

    let report = tokio::time::timeout(Duration::from_secs(5), agent)
        .await
        .expect("worker kept the failed chunk")
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, WorkerExit::TaskFailed);
    assert_eq!(report.tasks_completed, 0);

    // Connection is closed without a chunk result
    loop {
        match tokio::time::timeout(Duration::from_secs(5), raw.next())
            .await
            .unwrap()
        {
            None | Some(Err(_)) => break,
            Some(Ok(line)) => assert!(
                !line.contains("chunk_result"),
                "unexpected result frame: {line}"
            ),
        }
    }
}
