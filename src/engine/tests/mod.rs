mod progress;
mod retry;
