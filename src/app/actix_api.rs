use crate::{
    Result,
    app::{
        game_api::{
            Command,
            CommandError,
            CommandResponder,
            GameApi,
        },
        notifier::ChannelNotifier,
    },
    game::GameStatus,
    pair::UserId,
};
use actix_cors::Cors;
use actix_web::{
    App,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    error::{
        ErrorBadRequest,
        ErrorForbidden,
        ErrorInternalServerError,
    },
    web,
};
use anyhow::{
    Context,
    anyhow,
};
use std::{
    net::TcpListener,
    thread::JoinHandle,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_stream::{
    StreamExt,
    wrappers::ReceiverStream,
};

pub struct ActixGameApi {
    receiver: mpsc::Receiver<Command>,
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixGameApi {
    pub async fn new(port: Option<u16>, notifier: ChannelNotifier) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(16);

        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .context("failed to bind HTTP listener for game API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("game API listening on {}", base_url);

        let server_sender = sender.clone();
        let server = HttpServer::new(move || {
            let sender = server_sender.clone();
            let notifier = notifier.clone();

            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(sender))
                .app_data(web::Data::new(notifier))
                .route("/game/{user}/status/{peer}", web::get().to(handle_status))
                .route("/game/{user}/deposit/{peer}", web::post().to(handle_deposit))
                .route("/game/{user}/message/{peer}", web::post().to(handle_message))
                .route("/events/{user}", web::get().to(handle_events))
        })
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            receiver,
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl GameApi for ActixGameApi {
    async fn next_command(&mut self) -> Result<Command> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("command server closed"))
    }
}

impl Drop for ActixGameApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

async fn dispatch(
    sender: &mpsc::Sender<Command>,
    make: impl FnOnce(CommandResponder) -> Command,
) -> actix_web::Result<web::Json<GameStatus>> {
    let (respond, response) = oneshot::channel();

    sender
        .clone()
        .send(make(respond))
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward game command"))?;

    let result = response
        .await
        .map_err(|_| ErrorInternalServerError("game command responder dropped"))?;

    match result {
        Ok(status) => Ok(web::Json(status)),
        Err(CommandError::DepositRequired) => {
            Err(ErrorForbidden("Deposit required before sending messages."))
        }
        Err(CommandError::InvalidPair(message)) => Err(ErrorBadRequest(message)),
        Err(CommandError::Internal(message)) => Err(ErrorInternalServerError(message)),
    }
}

async fn handle_status(
    sender: web::Data<mpsc::Sender<Command>>,
    path: web::Path<(String, String)>,
) -> actix_web::Result<web::Json<GameStatus>> {
    tracing::debug!("received status request");
    let (user, peer) = path.into_inner();
    dispatch(sender.get_ref(), |respond| Command::Status {
        user: UserId::new(user),
        peer: UserId::new(peer),
        respond,
    })
    .await
}

async fn handle_deposit(
    sender: web::Data<mpsc::Sender<Command>>,
    path: web::Path<(String, String)>,
) -> actix_web::Result<web::Json<GameStatus>> {
    tracing::debug!("received deposit confirmation");
    let (user, peer) = path.into_inner();
    dispatch(sender.get_ref(), |respond| Command::Deposit {
        user: UserId::new(user),
        peer: UserId::new(peer),
        respond,
    })
    .await
}

async fn handle_message(
    sender: web::Data<mpsc::Sender<Command>>,
    path: web::Path<(String, String)>,
) -> actix_web::Result<web::Json<GameStatus>> {
    tracing::debug!("received message event");
    let (user, peer) = path.into_inner();
    dispatch(sender.get_ref(), |respond| Command::Message {
        user: UserId::new(user),
        peer: UserId::new(peer),
        respond,
    })
    .await
}

/// NDJSON stream of push events for one user's live connection.
async fn handle_events(
    notifier: web::Data<ChannelNotifier>,
    user: web::Path<String>,
) -> HttpResponse {
    let user = UserId::new(user.into_inner());
    tracing::debug!("user {user} connected to the event stream");
    let receiver = notifier.subscribe(user);
    let stream = ReceiverStream::new(receiver).map(|event| {
        let mut bytes =
            serde_json::to_vec(&event).map_err(ErrorInternalServerError)?;
        bytes.push(b'\n');
        Ok::<_, actix_web::Error>(web::Bytes::from(bytes))
    });
    HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .streaming(stream)
}
