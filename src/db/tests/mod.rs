mod state;
mod tasks;
